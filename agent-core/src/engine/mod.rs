//! The container-engine boundary: everything the rest of the pipeline needs
//! from a running container runtime, without committing to how the calls are
//! marshalled. [`bollard_engine::BollardEngine`] is the concrete adapter; the
//! reconciliation loop, tailer and samplers only ever see [`Engine`].

pub mod bollard_engine;
pub mod cgroup;
pub mod endpoint;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::error::EngineError;

/// A running container as returned by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Leading slash stripped, as Docker's own API returns it doubled-up.
    pub name: String,
}

/// Everything the attach protocol needs, learned via an inspect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub tty: bool,
}

/// A lifecycle event as read off the engine's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: String,
    pub status: EventStatus,
}

/// The lifecycle transitions the tailer and sampler care about. Every other
/// status the engine reports is preserved for metric labeling but otherwise
/// ignored by the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Create,
    Start,
    Die,
    Destroy,
    Other(String),
}

impl EventStatus {
    /// The raw status string, used as-is in `docker.events.<status>` counter names.
    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::Create => "create",
            EventStatus::Start => "start",
            EventStatus::Die => "die",
            EventStatus::Destroy => "destroy",
            EventStatus::Other(s) => s,
        }
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = ContainerEvent> + Send>>;

/// The other end of the attach handshake: holding it is permission to signal
/// "I have acknowledged streaming has started" by dropping a unit down it.
pub struct ReadyAck(pub oneshot::Sender<()>);

/// Delivered once the engine starts streaming a container's output. The
/// caller must receive `ready`, then send back through it before relying on
/// `stdout`/`stderr` — see §4.3 step 4.
pub struct AttachHandle {
    pub ready: oneshot::Receiver<ReadyAck>,
    pub stdout: mpsc::Receiver<Bytes>,
    pub stderr: mpsc::Receiver<Bytes>,
    /// Resolves when the attach RPC itself returns (container exited, engine
    /// error, or stream close) — independent of the pipe channels closing.
    pub done: oneshot::Receiver<Result<(), EngineError>>,
}

/// Per-container CPU accounting read from the cgroup hierarchy, in the same
/// clock-tick units host CPU times are reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CgroupCpuStats {
    pub user: u64,
    pub system: u64,
}

/// Per-container memory accounting read from the cgroup hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgroupMemStats {
    pub cache: u64,
    pub rss: u64,
    /// `u64::MAX` when the container has no effective hierarchical limit.
    pub hierarchical_memory_limit: u64,
}

/// Counts used for the once-per-minute image/layer gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCounts {
    pub images: usize,
    pub layers: usize,
}

/// The container-engine boundary. A concrete adapter owns the transport
/// (HTTP over a unix socket or TCP, in `bollard_engine`); cgroup reads are a
/// parallel concern handled by [`cgroup`] since the engine's own API does not
/// expose per-container resource accounting.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    /// Running containers only (`all=false`), as used by the reconciliation
    /// loop's pre-watch bootstrap and the periodic container-count gauge.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn list_images(&self) -> Result<ImageCounts, EngineError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    /// Subscribes to the engine's lifecycle event stream. A fresh stream is
    /// opened on every call; the broadcaster re-opens one per connection
    /// attempt.
    async fn events(&self) -> Result<EventStream, EngineError>;

    /// Starts streaming a container's stdout/stderr. Returns once the engine
    /// has set up the connection and is ready to deliver the attach
    /// handshake described in [`AttachHandle`]. `historical` requests
    /// previously buffered output be replayed first (used on `create`
    /// events); `start` events attach with `historical=false`.
    async fn attach(&self, id: &str, tty: bool, historical: bool) -> Result<AttachHandle, EngineError>;
}
