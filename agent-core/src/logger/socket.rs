//! Line-based log sinks: UDP, TCP, and TLS destinations. Connections are
//! lazy — nothing dials until the first record needs writing — and a failed
//! write invalidates the connection so the next call reconnects.

use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::formatter::Formatter;
use crate::tailer::{LogHandler, LogRecord};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum Destination {
    Udp { host: String, port: u16 },
    Tcp { host: String, port: u16 },
    Tls {
        host: String,
        port: u16,
        root_store: Arc<rustls::RootCertStore>,
    },
}

enum Conn {
    Udp(UdpSocket),
    Tcp(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Conn {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Conn::Udp(s) => s.send(buf),
            Conn::Tcp(s) => s.write_all(buf).map(|()| buf.len()),
            Conn::Tls(s) => s.write_all(buf).map(|()| buf.len()),
        }
    }
}

/// A log handler that writes formatted records to a single network
/// destination, reconnecting indefinitely (every 10s) on failure.
pub struct SocketLogger {
    formatter: Box<dyn Formatter>,
    destination: Destination,
    conn: Mutex<Option<Conn>>,
}

impl SocketLogger {
    pub fn new(formatter: Box<dyn Formatter>, destination: Destination) -> Self {
        Self {
            formatter,
            destination,
            conn: Mutex::new(None),
        }
    }

    /// Blocks until a connection is established, retrying every 10s on
    /// failure. Only called while holding the connection lock, so concurrent
    /// writers never race to dial.
    fn connect(&self) -> Conn {
        loop {
            match self.dial() {
                Ok(conn) => return conn,
                Err(e) => {
                    log::warn!("socket logger: connect failed, retrying in 10s: {e}");
                    std::thread::sleep(RECONNECT_BACKOFF);
                }
            }
        }
    }

    fn dial(&self) -> std::io::Result<Conn> {
        match &self.destination {
            Destination::Udp { host, port } => {
                let socket = UdpSocket::bind("0.0.0.0:0")?;
                socket.connect((host.as_str(), *port))?;
                Ok(Conn::Udp(socket))
            }
            Destination::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))?;
                Ok(Conn::Tcp(stream))
            }
            Destination::Tls { host, port, root_store } => {
                let stream = TcpStream::connect((host.as_str(), *port))?;
                let config = rustls::ClientConfig::builder()
                    .with_root_certificates((**root_store).clone())
                    .with_no_client_auth();
                let server_name = rustls::pki_types::ServerName::try_from(host.clone())
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let client = rustls::ClientConnection::new(Arc::new(config), server_name)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                Ok(Conn::Tls(Box::new(rustls::StreamOwned::new(client, stream))))
            }
        }
    }
}

impl LogHandler for SocketLogger {
    fn handle_log(&self, record: &LogRecord) {
        let line = self.formatter.format(record);
        let mut guard = self.conn.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.connect());
        }
        let conn = guard.as_mut().unwrap();
        match conn.write_all(&line) {
            Ok(written) if written == line.len() => {}
            Ok(written) => {
                log::warn!("socket logger: short write ({written} of {})", line.len());
                *guard = None;
            }
            Err(e) => {
                log::warn!("socket logger: write failed: {e}");
                *guard = None;
            }
        }
    }
}
