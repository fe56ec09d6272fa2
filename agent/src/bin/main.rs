//! CLI entry point: loads configuration, wires the pipeline together, and
//! runs it until the process is signalled to exit.

use std::sync::Arc;

use agent_core::broadcaster::Broadcaster;
use agent_core::config::{parse_log_destination, resolve_hostname, AgentConfig};
use agent_core::engine::bollard_engine::BollardEngine;
use agent_core::engine::endpoint::{self, Endpoint};
use agent_core::logger::console::ConsoleLogger;
use agent_core::logger::socket::{Destination, SocketLogger};
use agent_core::logger::{build_formatter, LogFormat};
use agent_core::metrics::{safe_name, Registry};
use agent_core::sampler::{container, host};
use agent_core::sink::graphite::GraphiteSink;
use agent_core::sink::influxdb::InfluxDbSink;
use agent_core::tailer::{LogRecord, Stream, Tailer};
use clap::Parser;

/// A single-host telemetry agent for a container runtime.
#[derive(Debug, Parser)]
#[command(name = "hud-agent", version)]
struct Cli {
    /// Path to a TOML configuration file; CLI flags override its values.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Prefix prepended to every metric name.
    #[arg(long)]
    prefix: Option<String>,

    /// Seconds between registry flushes and container-sampling passes.
    #[arg(long)]
    flush_interval: Option<u64>,

    /// Skip log tailing entirely.
    #[arg(long)]
    no_logs: bool,

    /// Skip host and container sampling entirely.
    #[arg(long)]
    no_stats: bool,

    /// Repeatable: `addr[=format]`, e.g. `console`, `tcp://host:514=syslog`.
    #[arg(long = "log-to")]
    log_to: Vec<String>,

    /// Graphite `host:port` to ship metrics to.
    #[arg(long)]
    graphite_addr: Option<String>,

    #[arg(long)]
    influxdb_addr: Option<String>,
    #[arg(long)]
    influxdb_user: Option<String>,
    #[arg(long)]
    influxdb_pass: Option<String>,
    #[arg(long)]
    influxdb_db: Option<String>,

    /// Identifier written into syslog-framed records; defaults to the OS hostname.
    #[arg(long)]
    hostname: Option<String>,

    /// Verbose (debug) logging.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Even more verbose (trace) logging.
    #[arg(long)]
    debug: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        }
        None => AgentConfig::default(),
    };

    if let Some(prefix) = &cli.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(secs) = cli.flush_interval {
        config.flush_interval = std::time::Duration::from_secs(secs);
    }
    config.no_logs |= cli.no_logs;
    config.no_stats |= cli.no_stats;
    config.log_to.extend(cli.log_to.iter().cloned());
    config.graphite_addr = cli.graphite_addr.clone().or(config.graphite_addr);
    config.influxdb_addr = cli.influxdb_addr.clone().or(config.influxdb_addr);
    config.influxdb_user = cli.influxdb_user.clone().or(config.influxdb_user);
    config.influxdb_pass = cli.influxdb_pass.clone().or(config.influxdb_pass);
    config.influxdb_db = cli.influxdb_db.clone().or(config.influxdb_db);
    config.hostname = cli.hostname.clone().or(config.hostname);

    Ok(config)
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = load_config(&cli)?;

    let endpoint = endpoint::resolve_from_env()?;
    let engine = Arc::new(match &endpoint {
        Endpoint::Unix { path } => BollardEngine::connect_unix(path)?,
        Endpoint::Tcp { host, port } => BollardEngine::connect_tcp(host, port)?,
        Endpoint::Fd { raw } => {
            anyhow::bail!("fd:// engine endpoints are not supported by this transport: {raw}")
        }
    });

    let registry = Registry::new(config.prefix.clone());
    let hostname = resolve_hostname(config.hostname.as_deref());

    if let Some(addr) = &config.graphite_addr {
        registry.add_sink("graphite", GraphiteSink::new(addr.clone()));
    }
    if let Some(addr) = &config.influxdb_addr {
        registry.add_sink(
            "influxdb",
            InfluxDbSink::new(
                addr.clone(),
                config.influxdb_user.clone(),
                config.influxdb_pass.clone(),
                config.influxdb_db.clone().unwrap_or_default(),
            ),
        );
    }

    let broadcaster = Broadcaster::new(engine.clone());

    {
        let registry = registry.clone();
        broadcaster.add_event_handler(move |event| {
            registry.record_counter(&format!("docker.events.{}", event.status.as_str()), 1);
        });
    }

    if !config.no_logs {
        let tailer = Tailer::new(engine.clone());
        {
            let registry = registry.clone();
            tailer.add_log_handler(move |record: &LogRecord| {
                let name = safe_name(&record.container_name);
                let stream = match record.stream {
                    Stream::Stdout => "stdout",
                    Stream::Stderr => "stderr",
                };
                registry.record_counter(&format!("docker.logs.total.{name}"), 1);
                registry.record_counter(&format!("docker.logs.{stream}.{name}"), 1);
            });
        }
        for raw in &config.log_to {
            let dest = parse_log_destination(raw)?;
            let format: LogFormat = dest.format.into();
            let newline = dest.addr.starts_with("tcp://") || dest.addr.starts_with("tls://");
            let formatter = build_formatter(format, &hostname, newline);
            if dest.addr == "console" {
                tailer.add_log_handler(ConsoleLogger::new(formatter, std::io::stdout()));
                continue;
            }
            let destination = parse_socket_destination(&dest.addr)?;
            tailer.add_log_handler(SocketLogger::new(formatter, destination));
        }
        tailer.subscribe(&broadcaster);
    }

    if !config.no_stats {
        tokio::spawn(host::run_forever(registry.clone()));
        tokio::spawn(container::run_forever(engine, registry.clone(), config.flush_interval));
    }

    tokio::spawn(registry.flush_periodically(config.flush_interval));

    broadcaster.watch_forever().await;
    Ok(())
}

fn parse_socket_destination(addr: &str) -> anyhow::Result<Destination> {
    let (scheme, rest) = addr
        .split_once("://")
        .ok_or_else(|| anyhow::anyhow!("invalid log destination: {addr}"))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("log destination missing port: {addr}"))?;
    let port: u16 = port.parse()?;
    match scheme {
        "udp" => Ok(Destination::Udp {
            host: host.to_owned(),
            port,
        }),
        "tcp" => Ok(Destination::Tcp {
            host: host.to_owned(),
            port,
        }),
        "tls" => {
            // No CA pool is wired up from the CLI yet; an empty store means
            // only already-trusted certs (none) validate.
            let store = rustls::RootCertStore::empty();
            Ok(Destination::Tls {
                host: host.to_owned(),
                port,
                root_store: std::sync::Arc::new(store),
            })
        }
        other => anyhow::bail!("unsupported log destination scheme: {other}"),
    }
}
