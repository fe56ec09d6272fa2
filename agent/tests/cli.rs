use assert_cmd::Command;

#[test]
fn help_exits_cleanly() {
    Command::cargo_bin("hud-agent")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn rejects_unsupported_log_destination_scheme() {
    Command::cargo_bin("hud-agent")
        .unwrap()
        .args(["--log-to", "npipe://./pipe"])
        .assert()
        .failure();
}
