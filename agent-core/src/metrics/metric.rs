use std::sync::Mutex;

/// A value a [`Metric`] can hold at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

/// Common capability of every metric kind: a name, a current value, an independent
/// snapshot, and a reset. Modeled as a capability set behind a trait object rather
/// than a class hierarchy, so the registry can hold any metric kind uniformly.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;
    fn value(&self) -> MetricValue;
    /// Returns a detached copy holding the current value. The copy never sees
    /// further mutations made to `self`.
    fn snapshot(&self) -> Box<dyn Metric>;
    /// Zeroes the metric in place. A no-op for gauges (see module docs on the
    /// registry for why only counters reset).
    fn reset(&self);
}

/// A monotonically increasing count, reset to zero on each registry flush.
pub struct Counter {
    name: String,
    value: Mutex<i64>,
}

impl Counter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(0),
        }
    }

    pub fn inc(&self, delta: i64) {
        let mut v = self.value.lock().unwrap();
        *v += delta;
    }

    pub fn get(&self) -> i64 {
        *self.value.lock().unwrap()
    }
}

impl Metric for Counter {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> MetricValue {
        MetricValue::Int(self.get())
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        let snap = Counter::new(self.name.clone());
        *snap.value.lock().unwrap() = self.get();
        Box::new(snap)
    }

    fn reset(&self) {
        *self.value.lock().unwrap() = 0;
    }
}

/// A last-value gauge of an integer quantity. Resets are a no-op: the value
/// persists until the next sampler pass overwrites it.
pub struct IntGauge {
    name: String,
    value: Mutex<i64>,
}

impl IntGauge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        *self.value.lock().unwrap() = value;
    }

    pub fn get(&self) -> i64 {
        *self.value.lock().unwrap()
    }
}

impl Metric for IntGauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> MetricValue {
        MetricValue::Int(self.get())
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        let snap = IntGauge::new(self.name.clone());
        snap.set(self.get());
        Box::new(snap)
    }

    fn reset(&self) {
        // Gauges retain their last set value through a reset; see §4.1.
    }
}

/// A last-value gauge of a floating-point quantity (percentages, rates).
pub struct FloatGauge {
    name: String,
    value: Mutex<f64>,
}

impl FloatGauge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(0.0),
        }
    }

    pub fn set(&self, value: f64) {
        *self.value.lock().unwrap() = value;
    }

    pub fn get(&self) -> f64 {
        *self.value.lock().unwrap()
    }
}

impl Metric for FloatGauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> MetricValue {
        MetricValue::Float(self.get())
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        let snap = FloatGauge::new(self.name.clone());
        snap.set(self.get());
        Box::new(snap)
    }

    fn reset(&self) {
        // Gauges retain their last set value through a reset; see §4.1.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_and_resets() {
        let c = Counter::new("foo");
        c.inc(1);
        for _ in 0..10 {
            c.inc(1);
        }
        c.inc(10);
        assert_eq!(c.get(), 21);
        c.reset();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn gauge_survives_reset() {
        let g = IntGauge::new("foo");
        g.set(21);
        g.reset();
        assert_eq!(g.get(), 21);
    }

    #[test]
    fn snapshot_is_detached() {
        let c = Counter::new("foo");
        c.inc(5);
        let snap = c.snapshot();
        c.inc(100);
        assert_eq!(snap.value(), MetricValue::Int(5));
        assert_eq!(c.get(), 105);
    }
}
