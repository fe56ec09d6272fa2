//! Agent configuration: the options enumerated in §6, loadable from a TOML
//! file and overridable by CLI flags in the binary crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::logger::LogFormat;

fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    #[serde(default)]
    pub no_logs: bool,

    #[serde(default)]
    pub no_stats: bool,

    #[serde(default)]
    pub log_to: Vec<String>,

    #[serde(default)]
    pub graphite_addr: Option<String>,

    #[serde(default)]
    pub influxdb_addr: Option<String>,
    #[serde(default)]
    pub influxdb_user: Option<String>,
    #[serde(default)]
    pub influxdb_pass: Option<String>,
    #[serde(default)]
    pub influxdb_db: Option<String>,

    #[serde(default)]
    pub hostname: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            flush_interval: default_flush_interval(),
            no_logs: false,
            no_stats: false,
            log_to: Vec::new(),
            graphite_addr: None,
            influxdb_addr: None,
            influxdb_user: None,
            influxdb_pass: None,
            influxdb_db: None,
            hostname: None,
        }
    }
}

/// A single `log_to` destination, split into its address and format per the
/// `addr[=format]` grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDestination {
    pub addr: String,
    pub format: LogDestFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestFormat {
    Short,
    Ext,
    Json,
    Syslog,
}

impl From<LogDestFormat> for LogFormat {
    fn from(f: LogDestFormat) -> Self {
        match f {
            LogDestFormat::Short => LogFormat::Short,
            LogDestFormat::Ext => LogFormat::Ext,
            LogDestFormat::Json => LogFormat::Json,
            LogDestFormat::Syslog => LogFormat::Syslog,
        }
    }
}

pub fn parse_log_destination(raw: &str) -> Result<LogDestination, SinkError> {
    let (addr, format) = match raw.split_once('=') {
        Some((addr, format)) => (addr, format),
        None => (raw, "short"),
    };
    let format = match format {
        "short" => LogDestFormat::Short,
        "ext" => LogDestFormat::Ext,
        "json" => LogDestFormat::Json,
        "syslog" => LogDestFormat::Syslog,
        other => return Err(SinkError::UnsupportedScheme(other.to_owned())),
    };
    if addr != "console"
        && !addr.starts_with("tcp://")
        && !addr.starts_with("udp://")
        && !addr.starts_with("tls://")
    {
        return Err(SinkError::UnsupportedScheme(addr.to_owned()));
    }
    Ok(LogDestination {
        addr: addr.to_owned(),
        format,
    })
}

pub fn resolve_hostname(configured: Option<&str>) -> String {
    configured
        .map(str::to_owned)
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_console_defaults_to_short_format() {
        let d = parse_log_destination("console").unwrap();
        assert_eq!(d.addr, "console");
        assert_eq!(d.format, LogDestFormat::Short);
    }

    #[test]
    fn explicit_format_is_parsed() {
        let d = parse_log_destination("tcp://127.0.0.1:514=syslog").unwrap();
        assert_eq!(d.addr, "tcp://127.0.0.1:514");
        assert_eq!(d.format, LogDestFormat::Syslog);
    }

    #[test]
    fn unsupported_scheme_is_an_error() {
        assert!(parse_log_destination("npipe://./pipe").is_err());
    }

    #[test]
    fn unsupported_format_is_an_error() {
        assert!(parse_log_destination("console=xml").is_err());
    }
}
