//! Log-record formatting and the two handler kinds (`console`, socket-based).

pub mod ansi;
pub mod console;
pub mod formatter;
pub mod socket;

use std::str::FromStr;

use formatter::{ExtendedFormatter, Formatter, JsonFormatter, ShortFormatter, SyslogFormatter};

/// One of the four named formats from §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Short,
    Ext,
    Json,
    Syslog,
}

impl FromStr for LogFormat {
    type Err = crate::error::SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(LogFormat::Short),
            "ext" => Ok(LogFormat::Ext),
            "json" => Ok(LogFormat::Json),
            "syslog" => Ok(LogFormat::Syslog),
            other => Err(crate::error::SinkError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Builds the formatter for a log destination. `newline` selects the syslog
/// convention (appended only for `tcp`/`tls` destinations; see §6).
pub fn build_formatter(format: LogFormat, hostname: &str, newline: bool) -> Box<dyn Formatter> {
    match format {
        LogFormat::Short => Box::new(ShortFormatter::new()),
        LogFormat::Ext => Box::new(ExtendedFormatter),
        LogFormat::Json => Box::new(JsonFormatter),
        LogFormat::Syslog => Box::new(SyslogFormatter {
            hostname: hostname.to_owned(),
            newline,
        }),
    }
}
