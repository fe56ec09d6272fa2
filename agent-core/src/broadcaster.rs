//! The event broadcaster: the single long-lived connection to the container
//! engine. Dispatches lifecycle events to subscribers and re-announces the
//! current container set on every (re)connect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use crate::engine::{ContainerEvent, ContainerSummary, Engine};

/// Opaque token returned at registration; removal uses the token rather than
/// matching callbacks by address (which is unreliable — see design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EventHandler = Arc<dyn Fn(ContainerEvent) + Send + Sync>;
type PreWatchHandler = Arc<dyn Fn(Vec<ContainerSummary>) + Send + Sync>;

struct Subscribers {
    event_handlers: Vec<(HandlerId, EventHandler)>,
    pre_watch_handlers: Vec<(HandlerId, PreWatchHandler)>,
}

/// The reconnect state machine described in §4.2. Exposed for tests and
/// observability; callers normally only use [`Broadcaster::watch_forever`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    ConnectedIdle,
    ConnectedWatching,
}

const BACKOFF: Duration = Duration::from_secs(1);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Broadcaster<E: Engine> {
    engine: Arc<E>,
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl<E: Engine + 'static> Broadcaster<E> {
    pub fn new(engine: Arc<E>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            subscribers: Mutex::new(Subscribers {
                event_handlers: Vec::new(),
                pre_watch_handlers: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    fn alloc_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_event_handler(&self, f: impl Fn(ContainerEvent) + Send + Sync + 'static) -> HandlerId {
        let id = self.alloc_id();
        self.subscribers
            .lock()
            .unwrap()
            .event_handlers
            .push((id, Arc::new(f)));
        id
    }

    pub fn add_pre_watch_handler(
        &self,
        f: impl Fn(Vec<ContainerSummary>) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.alloc_id();
        self.subscribers
            .lock()
            .unwrap()
            .pre_watch_handlers
            .push((id, Arc::new(f)));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.event_handlers.retain(|(hid, _)| *hid != id);
        subs.pre_watch_handlers.retain(|(hid, _)| *hid != id);
    }

    fn notify_pre_watch(&self, containers: Vec<ContainerSummary>) {
        let handlers: Vec<PreWatchHandler> = self
            .subscribers
            .lock()
            .unwrap()
            .pre_watch_handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for h in handlers {
            let containers = containers.clone();
            tokio::spawn(async move { h(containers) });
        }
    }

    fn broadcast(&self, event: ContainerEvent) {
        let handlers: Vec<EventHandler> = self
            .subscribers
            .lock()
            .unwrap()
            .event_handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for h in handlers {
            let event = event.clone();
            tokio::spawn(async move { h(event) });
        }
    }

    /// Runs the Disconnected/Connected-idle/Connected-watching state machine
    /// forever, per §4.2.
    pub async fn watch_forever(self: Arc<Self>) {
        let mut state = State::Disconnected;
        loop {
            state = match state {
                State::Disconnected => {
                    // Opening "a client" is just verifying the engine answers;
                    // the concrete Engine already holds its transport open.
                    State::ConnectedIdle
                }
                State::ConnectedIdle => match self.engine.ping().await {
                    Ok(()) => State::ConnectedWatching,
                    Err(e) => {
                        log::warn!("engine ping failed, backing off: {e}");
                        tokio::time::sleep(BACKOFF).await;
                        State::Disconnected
                    }
                },
                State::ConnectedWatching => {
                    match self.run_watch_session().await {
                        Ok(()) => {}
                        Err(e) => log::warn!("event stream session ended: {e}"),
                    }
                    tokio::time::sleep(BACKOFF).await;
                    State::Disconnected
                }
            };
        }
    }

    async fn run_watch_session(&self) -> Result<(), crate::error::EngineError> {
        match self.engine.list_containers().await {
            Ok(containers) => self.notify_pre_watch(containers),
            Err(e) => log::warn!("pre-watch container list failed: {e}"),
        }

        let mut events = self.engine.events().await?;
        loop {
            let next = tokio::time::timeout(LIVENESS_TIMEOUT, events.next()).await;
            match next {
                Ok(Some(event)) => self.broadcast(event),
                Ok(None) => return Err(crate::error::EngineError::EventStreamClosed),
                Err(_elapsed) => {
                    // No event within the liveness window: re-ping to confirm
                    // the connection is still alive.
                    self.engine.ping().await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AttachHandle, ContainerDetails, EventStream, ImageCounts};
    use std::sync::atomic::AtomicBool;

    struct FakeEngine {
        containers: Vec<ContainerSummary>,
    }

    #[async_trait::async_trait]
    impl Engine for FakeEngine {
        async fn ping(&self) -> Result<(), crate::error::EngineError> {
            Ok(())
        }
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, crate::error::EngineError> {
            Ok(self.containers.clone())
        }
        async fn list_images(&self) -> Result<ImageCounts, crate::error::EngineError> {
            Ok(ImageCounts::default())
        }
        async fn inspect(&self, id: &str) -> Result<ContainerDetails, crate::error::EngineError> {
            Ok(ContainerDetails {
                id: id.to_owned(),
                name: id.to_owned(),
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
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn pre_watch_handler_sees_current_containers() {
        let engine = Arc::new(FakeEngine {
            containers: vec![ContainerSummary {
                id: "a".into(),
                name: "alpha".into(),
            }],
        });
        let broadcaster = Broadcaster::new(engine);
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        broadcaster.add_pre_watch_handler(move |containers| {
            if containers.iter().any(|c| c.id == "a") {
                seen2.store(true, Ordering::SeqCst);
            }
        });

        let _ = broadcaster.run_watch_session().await;
        // handlers run on spawned tasks; yield so they get scheduled.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn handler_ids_are_unique_and_removal_is_token_based() {
        let engine = Arc::new(FakeEngine { containers: vec![] });
        let broadcaster = Broadcaster::new(engine);
        let id1 = broadcaster.add_event_handler(|_| {});
        let id2 = broadcaster.add_event_handler(|_| {});
        assert_ne!(id1, id2);
        broadcaster.remove_handler(id1);
        assert_eq!(broadcaster.subscribers.lock().unwrap().event_handlers.len(), 1);
    }
}
