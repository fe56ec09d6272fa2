use std::io::Write;
use std::sync::Mutex;

use super::formatter::Formatter;
use crate::tailer::{LogHandler, LogRecord};

/// Writes formatted records to a plain `io::Write` (normally stdout).
pub struct ConsoleLogger<W: Write + Send> {
    formatter: Box<dyn Formatter>,
    writer: Mutex<W>,
}

impl<W: Write + Send> ConsoleLogger<W> {
    pub fn new(formatter: Box<dyn Formatter>, writer: W) -> Self {
        Self {
            formatter,
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> LogHandler for ConsoleLogger<W> {
    fn handle_log(&self, record: &LogRecord) {
        let line = self.formatter.format(record);
        if let Err(e) = self.writer.lock().unwrap().write_all(&line) {
            log::warn!("console logger write failed: {e}");
        }
    }
}
