//! The process-wide metric registry: typed counters and gauges, point-in-time
//! snapshots, and fan-out to sink workers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::metric::{Counter, FloatGauge, IntGauge, Metric, MetricValue};

/// Sanitizes a container or stream name for use as a metric-name path segment,
/// since dots are the path separator in the metric-name grammar.
pub fn safe_name(name: &str) -> String {
    name.replace('.', "_")
}

/// A named, typed metric as seen in a [`Snapshot`].
pub struct SnapshotEntry {
    pub name: String,
    pub value: MetricValue,
}

/// An immutable, point-in-time copy of every metric in the registry.
///
/// Safe to hand off to sink workers without further locking: nothing in a
/// `Snapshot` is mutated again.
#[derive(Default)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum Slot {
    Counter(Arc<Counter>),
    IntGauge(Arc<IntGauge>),
    FloatGauge(Arc<FloatGauge>),
}

impl Slot {
    fn as_metric(&self) -> &dyn Metric {
        match self {
            Slot::Counter(c) => c.as_ref(),
            Slot::IntGauge(g) => g.as_ref(),
            Slot::FloatGauge(g) => g.as_ref(),
        }
    }
}

/// Sends a [`Snapshot`] to a sink worker's queue. Non-blocking: a full queue
/// drops the snapshot and logs a warning rather than stalling the flush loop.
struct SinkChannel {
    label: String,
    tx: tokio::sync::mpsc::Sender<Arc<Snapshot>>,
}

/// The process-wide collection of metrics.
///
/// All mutations (registration, reset) go through a single registry-wide lock;
/// reading or updating an individual metric's value takes only that metric's
/// own lock. `snapshot()` holds the registry lock for the whole copy, so no
/// mutation of the metric *set* can interleave with it — but since metric
/// values are read independently under their own locks, a snapshot observes
/// either the pre- or post-state of any single update, never a torn write.
pub struct Registry {
    prefix: String,
    metrics: Mutex<HashMap<String, Slot>>,
    sinks: Mutex<Vec<SinkChannel>>,
}

impl Registry {
    pub fn new(prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.into(),
            metrics: Mutex::new(HashMap::new()),
            sinks: Mutex::new(Vec::new()),
        })
    }

    fn prefixed(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    pub fn get_or_register_counter(&self, name: &str) -> Arc<Counter> {
        let name = self.prefixed(name);
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.entry(name.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => match e.get() {
                Slot::Counter(c) => c.clone(),
                _ => panic!("metric {name} already registered as a different kind"),
            },
            std::collections::hash_map::Entry::Vacant(e) => {
                let c = Arc::new(Counter::new(name));
                e.insert(Slot::Counter(c.clone()));
                c
            }
        }
    }

    pub fn get_or_register_gauge(&self, name: &str) -> Arc<IntGauge> {
        let name = self.prefixed(name);
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.entry(name.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => match e.get() {
                Slot::IntGauge(g) => g.clone(),
                _ => panic!("metric {name} already registered as a different kind"),
            },
            std::collections::hash_map::Entry::Vacant(e) => {
                let g = Arc::new(IntGauge::new(name));
                e.insert(Slot::IntGauge(g.clone()));
                g
            }
        }
    }

    pub fn get_or_register_gauge_float(&self, name: &str) -> Arc<FloatGauge> {
        let name = self.prefixed(name);
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.entry(name.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => match e.get() {
                Slot::FloatGauge(g) => g.clone(),
                _ => panic!("metric {name} already registered as a different kind"),
            },
            std::collections::hash_map::Entry::Vacant(e) => {
                let g = Arc::new(FloatGauge::new(name));
                e.insert(Slot::FloatGauge(g.clone()));
                g
            }
        }
    }

    /// Convenience used heavily by samplers: register-or-fetch then set/increment
    /// in one call, mirroring the teacher's `Collector::RecordGauge` helpers.
    pub fn record_counter(&self, name: &str, delta: i64) {
        self.get_or_register_counter(name).inc(delta);
    }

    pub fn record_gauge(&self, name: &str, value: i64) {
        self.get_or_register_gauge(name).set(value);
    }

    pub fn record_gauge_float(&self, name: &str, value: f64) {
        self.get_or_register_gauge_float(name).set(value);
    }

    /// Returns an immutable, point-in-time copy of every metric.
    pub fn snapshot(&self) -> Snapshot {
        let metrics = self.metrics.lock().unwrap();
        let entries = metrics
            .values()
            .map(|slot| {
                let m = slot.as_metric();
                SnapshotEntry {
                    name: m.name().to_owned(),
                    value: m.value(),
                }
            })
            .collect();
        Snapshot { entries }
    }

    /// Zeroes every counter in place. Gauges are left untouched; see §4.1.
    pub fn reset(&self) {
        let metrics = self.metrics.lock().unwrap();
        for slot in metrics.values() {
            slot.as_metric().reset();
        }
    }

    /// Registers a sink and starts the background worker that feeds it
    /// snapshots as they are produced by [`Registry::flush_periodically`].
    pub fn add_sink(self: &Arc<Self>, label: impl Into<String>, mut worker: impl SinkWorker + 'static) {
        let label = label.into();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Arc<Snapshot>>(1);
        self.sinks.lock().unwrap().push(SinkChannel {
            label: label.clone(),
            tx,
        });
        tokio::spawn(async move {
            while let Some(snap) = rx.recv().await {
                worker.send(&snap).await;
            }
            log::debug!("sink {label} channel closed");
        });
    }

    /// Runs forever: snapshot, non-blocking offer to every sink, reset
    /// counters, sleep for `interval`.
    pub async fn flush_periodically(self: Arc<Self>, interval: Duration) {
        loop {
            let snap = Arc::new(self.snapshot());
            let sinks = self.sinks.lock().unwrap();
            for sink in sinks.iter() {
                match sink.tx.try_send(snap.clone()) {
                    Ok(()) => {}
                    Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                        log::warn!("sink {} queue full, dropping this flush", sink.label);
                    }
                    Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                        log::warn!("sink {} channel closed", sink.label);
                    }
                }
            }
            drop(sinks);
            self.reset();
            tokio::time::sleep(interval).await;
        }
    }
}

/// A background worker driven by [`Registry::add_sink`]. Implementations own
/// their connection and are responsible for their own reconnect policy; a
/// failed send is logged internally and must never panic the worker task.
#[async_trait::async_trait]
pub trait SinkWorker: Send {
    async fn send(&mut self, snapshot: &Snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments_modulo_resets() {
        let reg = Registry::new("");
        reg.record_counter("foo", 1);
        for _ in 0..10 {
            reg.record_counter("foo", 1);
        }
        reg.record_counter("foo", 10);

        let snap = reg.snapshot();
        let foo = snap.iter().find(|e| e.name == "foo").unwrap();
        assert_eq!(foo.value, MetricValue::Int(21));

        reg.reset();
        let snap = reg.snapshot();
        let foo = snap.iter().find(|e| e.name == "foo").unwrap();
        assert_eq!(foo.value, MetricValue::Int(0));
    }

    #[test]
    fn gauges_survive_reset_but_counters_zero() {
        let reg = Registry::new("");
        reg.record_gauge("bar", 21);
        reg.record_counter("baz", 5);
        reg.reset();
        let snap = reg.snapshot();
        let bar = snap.iter().find(|e| e.name == "bar").unwrap();
        let baz = snap.iter().find(|e| e.name == "baz").unwrap();
        assert_eq!(bar.value, MetricValue::Int(21));
        assert_eq!(baz.value, MetricValue::Int(0));
    }

    #[test]
    fn safe_name_replaces_dots() {
        assert_eq!(safe_name("web.1"), "web_1");
        assert_eq!(safe_name("plain"), "plain");
    }

    #[test]
    fn names_are_prefixed() {
        let reg = Registry::new("myhost");
        reg.record_gauge("docker.containers", 3);
        let snap = reg.snapshot();
        assert!(snap.iter().any(|e| e.name == "myhost.docker.containers"));
    }

    #[test]
    #[should_panic(expected = "already registered as a different kind")]
    fn type_mismatch_is_fatal() {
        let reg = Registry::new("");
        reg.get_or_register_counter("x");
        reg.get_or_register_gauge("x");
    }
}
