//! Time-series sink for an InfluxDB v1-style HTTP write API. Pings (and
//! authenticates, if configured) before the first write of each connection;
//! a failed send drops back to the ping phase.

use std::fmt::Write as _;
use std::time::Duration;

use crate::metrics::{MetricValue, Snapshot, SinkWorker};

const RETRY_BACKOFF: Duration = Duration::from_secs(10);

pub struct InfluxDbSink {
    client: reqwest::Client,
    addr: String,
    user: Option<String>,
    pass: Option<String>,
    db: String,
    ready: bool,
}

impl InfluxDbSink {
    pub fn new(addr: impl Into<String>, user: Option<String>, pass: Option<String>, db: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            addr: addr.into(),
            user,
            pass,
            db: db.into(),
            ready: false,
        }
    }

    async fn ping(&self) -> Result<(), crate::error::SinkError> {
        let url = format!("{}/ping", self.addr.trim_end_matches('/'));
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::error::SinkError::Ping(e.into()))?;
        Ok(())
    }

    async fn write(&self, body: String) -> Result<(), crate::error::SinkError> {
        let url = format!("{}/write?db={}", self.addr.trim_end_matches('/'), self.db);
        let mut req = self.client.post(&url).body(body);
        if let (Some(user), Some(pass)) = (&self.user, &self.pass) {
            req = req.basic_auth(user, Some(pass));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| crate::error::SinkError::Write(std::io::Error::other(e)))?;
        if resp.status().is_client_error() && resp.status().as_u16() == 401 {
            return Err(crate::error::SinkError::Auth(anyhow::anyhow!(
                "influxdb rejected credentials"
            )));
        }
        if !resp.status().is_success() {
            return Err(crate::error::SinkError::Write(std::io::Error::other(format!(
                "influxdb write returned {}",
                resp.status()
            ))));
        }
        Ok(())
    }
}

fn line_protocol(name: &str, value: MetricValue, unix_nanos: i64) -> String {
    let mut line = String::new();
    match value {
        MetricValue::Int(v) => {
            let _ = write!(line, "{name} value={v}i {unix_nanos}");
        }
        MetricValue::Float(v) => {
            let _ = write!(line, "{name} value={v} {unix_nanos}");
        }
    }
    line
}

#[async_trait::async_trait]
impl SinkWorker for InfluxDbSink {
    async fn send(&mut self, snapshot: &Snapshot) {
        while !self.ready {
            match self.ping().await {
                Ok(()) => self.ready = true,
                Err(e) => {
                    log::warn!("influxdb: ping failed, retrying in 10s: {e}");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }

        let unix_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let body = snapshot
            .iter()
            .map(|e| line_protocol(&e.name, e.value, unix_nanos))
            .collect::<Vec<_>>()
            .join("\n");
        if body.is_empty() {
            return;
        }

        if let Err(e) = self.write(body).await {
            log::warn!("influxdb: write failed, will re-ping next flush: {e}");
            self.ready = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_int_and_float_fields() {
        assert_eq!(line_protocol("docker.containers", MetricValue::Int(3), 100), "docker.containers value=3i 100");
        assert_eq!(line_protocol("system.load.load1", MetricValue::Float(0.5), 100), "system.load.load1 value=0.5 100");
    }
}
