//! Error types for the container-telemetry pipeline.
//!
//! Transient conditions (engine hiccups, sink disconnects) are recovered locally by the
//! owning loop and never reach these types as a propagated `Result`; they are logged at
//! the call site instead. These enums cover what a caller actually needs to branch on.

use thiserror::Error;

/// Failure resolving or parsing the container-engine endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid bind address format: {0}")]
    BadFormat(String),
    #[error("invalid bind address protocol: {0}")]
    BadProtocol(String),
}

/// Failure talking to the container engine (connect, ping, list, inspect, attach).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unable to connect to the container engine: {0}")]
    Connect(#[source] anyhow::Error),
    #[error("ping failed: {0}")]
    Ping(#[source] anyhow::Error),
    #[error("unable to list containers: {0}")]
    ListContainers(#[source] anyhow::Error),
    #[error("unable to list images: {0}")]
    ListImages(#[source] anyhow::Error),
    #[error("unable to inspect container {id}: {source}")]
    Inspect { id: String, source: anyhow::Error },
    #[error("unable to attach to container {id}: {source}")]
    Attach { id: String, source: anyhow::Error },
    #[error("unable to read cgroup stats for container {id}: {source}")]
    Cgroup { id: String, source: anyhow::Error },
    #[error("event stream closed")]
    EventStreamClosed,
}

/// Failure sending encoded data (logs or metrics) to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("ping failed: {0}")]
    Ping(#[source] anyhow::Error),
    #[error("authentication failed: {0}")]
    Auth(#[source] anyhow::Error),
    #[error("unsupported destination scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid destination: {0}")]
    InvalidDestination(#[source] anyhow::Error),
}
