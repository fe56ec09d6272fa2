//! The four log-record formatters named in §6: `short`, `ext`, `json`, `syslog`.

use std::hash::Hasher;
use std::time::{Instant, SystemTime};

use chrono::{SecondsFormat, Utc};
use fnv::FnvHasher;

use super::ansi;
use crate::tailer::{LogRecord, Stream};

/// Renders a [`LogRecord`] to the bytes that go out over a sink connection.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> Vec<u8>;
}

fn strip_trailing_newline(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

fn iso_utc(ts: SystemTime) -> String {
    chrono::DateTime::<Utc>::from(ts).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One of the 6 standard ANSI foreground colours, picked per container name
/// so repeated runs of the same container always land on the same colour.
fn container_color(name: &str) -> u8 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    31 + (hasher.finish() % 6) as u8
}

/// `[SSSS] <name>: <message>` — `SSSS` is seconds since process start. ANSI
/// control sequences are stripped; colour sequences are preserved. When
/// `colored` is set and the destination is a terminal, the container name is
/// tinted by a hash of itself; otherwise any colour codes in the message are
/// stripped along with cursor control.
pub struct ShortFormatter {
    process_start: Instant,
    colored: bool,
}

impl ShortFormatter {
    pub fn new() -> Self {
        Self {
            process_start: Instant::now(),
            colored: false,
        }
    }

    pub fn colored(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }
}

impl Default for ShortFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for ShortFormatter {
    fn format(&self, record: &LogRecord) -> Vec<u8> {
        let secs = self.process_start.elapsed().as_secs();
        let msg = ansi::strip_control(strip_trailing_newline(&record.message));

        let mut out = if self.colored {
            format!(
                "[{secs:04}] \x1b[{}m{}\x1b[0m: ",
                container_color(&record.container_name),
                record.container_name
            )
            .into_bytes()
        } else {
            format!("[{secs:04}] {}: ", record.container_name).into_bytes()
        };
        out.extend_from_slice(&msg);
        out.push(b'\n');
        out
    }
}

/// `<iso-utc> container=<name> msg="<message>"`.
pub struct ExtendedFormatter;

impl Formatter for ExtendedFormatter {
    fn format(&self, record: &LogRecord) -> Vec<u8> {
        let msg = String::from_utf8_lossy(strip_trailing_newline(&record.message)).replace('"', "\\\"");
        format!(
            "{} container={} msg=\"{}\"\n",
            iso_utc(record.timestamp),
            record.container_name,
            msg
        )
        .into_bytes()
    }
}

/// A JSON object with keys `time`, `msg`, `stream`, `name`, `id`.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, record: &LogRecord) -> Vec<u8> {
        let msg = String::from_utf8_lossy(strip_trailing_newline(&record.message)).into_owned();
        let stream = match record.stream {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        };
        let value = serde_json::json!({
            "time": iso_utc(record.timestamp),
            "msg": msg,
            "stream": stream,
            "name": record.container_name,
            "id": record.container_id,
        });
        let mut out = serde_json::to_vec(&value).unwrap_or_default();
        out.push(b'\n');
        out
    }
}

const FACILITY_LOCAL1: u8 = 17;
const SEVERITY_INFO: u8 = 6;

/// RFC 5424 framing: `<PRI>1 <ts> <host> <tag> - - - <msg>`. A trailing
/// newline is appended only for `tcp`-framed destinations (§6).
pub struct SyslogFormatter {
    pub hostname: String,
    pub newline: bool,
}

impl SyslogFormatter {
    fn priority() -> u8 {
        (FACILITY_LOCAL1 << 3) | SEVERITY_INFO
    }
}

impl Formatter for SyslogFormatter {
    fn format(&self, record: &LogRecord) -> Vec<u8> {
        let msg = String::from_utf8_lossy(strip_trailing_newline(&record.message)).into_owned();
        let ts = chrono::DateTime::<Utc>::from(record.timestamp).to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut line = format!(
            "<{}>1 {} {} {} - - - {}",
            Self::priority(),
            ts,
            self.hostname,
            record.container_name,
            msg
        );
        if self.newline {
            line.push('\n');
        }
        line.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tailer::Stream;
    use bytes::Bytes;

    fn record() -> LogRecord {
        LogRecord {
            timestamp: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1577934245),
            container_id: "deadbeef".into(),
            container_name: "c".into(),
            stream: Stream::Stdout,
            message: Bytes::from_static(b"hi\n"),
        }
    }

    #[test]
    fn syslog_priority_is_local1_info() {
        assert_eq!(SyslogFormatter::priority(), 142);
    }

    #[test]
    fn syslog_tcp_appends_newline_udp_does_not() {
        let tcp = SyslogFormatter {
            hostname: "h".into(),
            newline: true,
        };
        let udp = SyslogFormatter {
            hostname: "h".into(),
            newline: false,
        };
        let r = record();
        assert!(tcp.format(&r).ends_with(b"\n"));
        assert!(!udp.format(&r).ends_with(b"\n"));
    }

    #[test]
    fn json_has_expected_keys() {
        let out = JsonFormatter.format(&record());
        let v: serde_json::Value = serde_json::from_slice(&out[..out.len() - 1]).unwrap();
        assert_eq!(v["msg"], "hi");
        assert_eq!(v["stream"], "stdout");
        assert_eq!(v["name"], "c");
        assert_eq!(v["id"], "deadbeef");
    }
}
