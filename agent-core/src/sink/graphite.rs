//! Graphite line-protocol sink: `"<name> <value> <unix-seconds>\n"` per
//! metric, lazy-reconnecting on write failure.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::metrics::{MetricValue, Snapshot, SinkWorker};

const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub struct GraphiteSink {
    addr: String,
    conn: Option<TcpStream>,
}

impl GraphiteSink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: None,
        }
    }

    async fn ensure_connected(&mut self) -> std::io::Result<&mut TcpStream> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            self.conn = Some(stream);
        }
        Ok(self.conn.as_mut().unwrap())
    }
}

/// `name/with/slashes` → `name_with_slashes`; floats render with exactly two
/// fractional digits.
fn encode_line(name: &str, value: MetricValue, unix_seconds: u64) -> String {
    let name = name.replace('/', "_");
    match value {
        MetricValue::Int(v) => format!("{name} {v} {unix_seconds}\n"),
        MetricValue::Float(v) => format!("{name} {v:.2} {unix_seconds}\n"),
    }
}

#[async_trait::async_trait]
impl SinkWorker for GraphiteSink {
    async fn send(&mut self, snapshot: &Snapshot) {
        let unix_seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let conn = match self.ensure_connected().await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("graphite: connect to {} failed: {e}", self.addr);
                self.conn = None;
                return;
            }
        };

        for entry in snapshot.iter() {
            let line = encode_line(&entry.name, entry.value, unix_seconds);
            let write = tokio::time::timeout(WRITE_DEADLINE, conn.write_all(line.as_bytes())).await;
            match write {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("graphite: write failed: {e}");
                    self.conn = None;
                    return;
                }
                Err(_) => {
                    log::warn!("graphite: write deadline exceeded");
                    self.conn = None;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_in_name_becomes_underscore() {
        assert_eq!(encode_line("a/b.c", MetricValue::Int(42), 100), "a_b.c 42 100\n");
    }

    #[test]
    fn float_renders_two_fractional_digits() {
        assert_eq!(encode_line("a/b.c", MetricValue::Float(1.0), 100), "a_b.c 1.00 100\n");
    }
}
