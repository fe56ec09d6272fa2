//! The log tailer: at-most-one attach per container, line-split stdout/stderr
//! into [`LogRecord`]s, and bounded fan-out to registered handlers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::broadcaster::Broadcaster;
use crate::engine::{ContainerEvent, ContainerSummary, Engine, EventStatus};

/// Which of a container's two output streams a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// An immutable published log line. `message` includes the trailing newline
/// that terminated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub container_id: String,
    pub container_name: String,
    pub stream: Stream,
    pub message: Bytes,
}

/// A log sink. Invoked synchronously by this handler's dedicated drain task,
/// so a slow handler only backs up its own queue, never another handler's.
pub trait LogHandler: Send + Sync + 'static {
    fn handle_log(&self, record: &LogRecord);
}

impl<F: Fn(&LogRecord) + Send + Sync + 'static> LogHandler for F {
    fn handle_log(&self, record: &LogRecord) {
        self(record)
    }
}

const HANDLER_QUEUE_CAPACITY: usize = 100;
const LINE_BUFFER_CAPACITY: usize = 64 * 1024;

struct HandlerSlot {
    tx: mpsc::Sender<LogRecord>,
}

pub struct Tailer<E: Engine> {
    engine: Arc<E>,
    attached: Mutex<HashSet<String>>,
    handlers: Mutex<Vec<HandlerSlot>>,
}

impl<E: Engine + 'static> Tailer<E> {
    pub fn new(engine: Arc<E>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            attached: Mutex::new(HashSet::new()),
            handlers: Mutex::new(Vec::new()),
        })
    }

    /// Registers a handler behind its own bounded queue and dedicated drain
    /// task. Publication blocks on a full queue (documented back-pressure
    /// policy, not drop — see §4.3).
    pub fn add_log_handler(&self, handler: impl LogHandler) {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(HANDLER_QUEUE_CAPACITY);
        self.handlers.lock().unwrap().push(HandlerSlot { tx });
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                handler.handle_log(&record);
            }
        });
    }

    async fn publish(&self, record: LogRecord) {
        let senders: Vec<mpsc::Sender<LogRecord>> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.tx.clone())
            .collect();
        for tx in senders {
            // Blocking send: a full queue back-pressures the reader task that
            // produced this record, rather than silently dropping it.
            let _ = tx.send(record.clone()).await;
        }
    }

    /// Wires this tailer up to a broadcaster's pre-watch and event handlers.
    /// Call once at startup.
    pub fn subscribe(self: &Arc<Self>, broadcaster: &Arc<Broadcaster<E>>) {
        let this = self.clone();
        broadcaster.add_pre_watch_handler(move |containers: Vec<ContainerSummary>| {
            let this = this.clone();
            tokio::spawn(async move {
                for c in containers {
                    this.watch_container(&c.id, false).await;
                }
            });
        });

        let this = self.clone();
        broadcaster.add_event_handler(move |event: ContainerEvent| {
            let this = this.clone();
            tokio::spawn(async move { this.on_event(event).await });
        });
    }

    async fn on_event(&self, event: ContainerEvent) {
        match event.status {
            EventStatus::Create => self.watch_container(&event.container_id, true).await,
            EventStatus::Start => self.watch_container(&event.container_id, false).await,
            _ => {}
        }
    }

    /// No-op if `id` is already attached — enforces the at-most-one-attach
    /// invariant across pre-watch bootstraps and create/start events.
    async fn watch_container(self: &Arc<Self>, id: &str, historical: bool) {
        {
            let mut attached = self.attached.lock().unwrap();
            if attached.contains(id) {
                return;
            }
            attached.insert(id.to_owned());
        }

        let this = self.clone();
        let id = id.to_owned();
        tokio::spawn(async move {
            this.tail_container(&id, historical).await;
            this.attached.lock().unwrap().remove(&id);
        });
    }

    async fn tail_container(&self, id: &str, historical: bool) {
        let details = match self.engine.inspect(id).await {
            Ok(d) => d,
            Err(e) => {
                log::warn!("inspect failed for {id}, skipping: {e}");
                return;
            }
        };

        let mut handle = match self.engine.attach(id, details.tty, historical).await {
            Ok(h) => h,
            Err(e) => {
                log::warn!("attach failed for {id}: {e}");
                return;
            }
        };

        match handle.ready.await {
            Ok(ack) => {
                let _ = ack.0.send(());
            }
            Err(_) => {
                log::warn!("attach for {id} never signalled ready");
                return;
            }
        }

        let stdout_task = self.drain_stream(handle.stdout, id.to_owned(), details.name.clone(), Stream::Stdout);
        let stderr_task = self.drain_stream(handle.stderr, id.to_owned(), details.name.clone(), Stream::Stderr);
        let _ = tokio::join!(stdout_task, stderr_task);
        let _ = handle.done.await;
    }

    async fn drain_stream(
        &self,
        mut rx: mpsc::Receiver<Bytes>,
        container_id: String,
        container_name: String,
        stream: Stream,
    ) {
        let mut buf = Vec::with_capacity(LINE_BUFFER_CAPACITY);
        while let Some(chunk) = rx.recv().await {
            buf.extend_from_slice(&chunk);
            loop {
                let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
                    if buf.len() > LINE_BUFFER_CAPACITY {
                        // Pathological line; drop what we have so far rather
                        // than growing without bound.
                        buf.clear();
                    }
                    break;
                };
                let line = buf.drain(..=pos).collect::<Vec<u8>>();
                let record = LogRecord {
                    timestamp: SystemTime::now(),
                    container_id: container_id.clone(),
                    container_name: container_name.clone(),
                    stream,
                    message: Bytes::from(line),
                };
                self.publish(record).await;
            }
        }
        // Trailing partial line on stream close is dropped, per §4.3.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AttachHandle, ContainerDetails, ContainerSummary, Engine, EventStream, ImageCounts, ReadyAck};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEngine;

    #[async_trait::async_trait]
    impl Engine for FakeEngine {
        async fn ping(&self) -> Result<(), crate::error::EngineError> {
            Ok(())
        }
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, crate::error::EngineError> {
            Ok(vec![])
        }
        async fn list_images(&self) -> Result<ImageCounts, crate::error::EngineError> {
            Ok(ImageCounts::default())
        }
        async fn inspect(&self, id: &str) -> Result<ContainerDetails, crate::error::EngineError> {
            Ok(ContainerDetails {
                id: id.to_owned(),
                name: format!("name-{id}"),
                tty: false,
            })
        }
        async fn events(&self) -> Result<EventStream, crate::error::EngineError> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn attach(
            &self,
            _id: &str,
            _tty: bool,
            _historical: bool,
        ) -> Result<AttachHandle, crate::error::EngineError> {
            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
            let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
            let (stdout_tx, stdout_rx) = mpsc::channel(16);
            let (_stderr_tx, stderr_rx) = mpsc::channel(16);
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            let _ = ready_tx.send(ReadyAck(ack_tx));
            tokio::spawn(async move {
                let _ = ack_rx.await;
                let _ = stdout_tx.send(Bytes::from_static(b"hello\n")).await;
                drop(stdout_tx);
                let _ = done_tx.send(Ok(()));
            });
            Ok(AttachHandle {
                ready: ready_rx,
                stdout: stdout_rx,
                stderr: stderr_rx,
                done: done_rx,
            })
        }
    }

    #[tokio::test]
    async fn duplicate_watch_is_a_no_op() {
        let tailer = Tailer::new(Arc::new(FakeEngine));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        tailer.add_log_handler(move |_: &LogRecord| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        tailer.watch_container("a", false).await;
        tailer.watch_container("a", false).await;
        tailer.watch_container("a", false).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn published_record_reaches_handler() {
        let tailer = Tailer::new(Arc::new(FakeEngine));
        let (tx, mut rx) = mpsc::channel(1);
        tailer.add_log_handler(move |r: &LogRecord| {
            let _ = tx.try_send(r.clone());
        });

        tailer.watch_container("a", false).await;
        let record = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.container_id, "a");
        assert_eq!(record.message.as_ref(), b"hello\n");
    }
}
