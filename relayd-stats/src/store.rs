//! Counters, gauges and the in-memory store that owns them.

use crate::symbol::StatName;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that goes up and down. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub fn dec(&self) {
        self.sub(1);
    }

    #[inline]
    pub fn add(&self, amount: i64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    #[inline]
    pub fn sub(&self, amount: i64) {
        self.0.fetch_sub(amount, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Join name fragments with `.`.
pub fn join_stat_names(names: &[StatName]) -> String {
    let len = names.iter().map(|n| n.as_str().len() + 1).sum::<usize>();
    let mut joined = String::with_capacity(len);
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            joined.push('.');
        }
        joined.push_str(name.as_str());
    }
    joined
}

/// A namespace of stats. Every name is prefixed with the scope's prefix.
pub trait Scope: Send + Sync {
    /// Prefix including the trailing `.`, empty for the root scope.
    fn prefix(&self) -> &str;

    fn counter(&self, name: &str) -> Counter;

    fn gauge(&self, name: &str) -> Gauge;

    /// Child scope named `<prefix><name>.`.
    fn create_scope(&self, name: &str) -> Arc<dyn Scope>;

    fn counter_from_stat_names(&self, names: &[StatName]) -> Counter {
        self.counter(&join_stat_names(names))
    }

    fn gauge_from_stat_names(&self, names: &[StatName]) -> Gauge {
        self.gauge(&join_stat_names(names))
    }

    fn increment_counter(&self, names: &[StatName]) {
        self.counter_from_stat_names(names).inc();
    }
}

/// Point-in-time copy of every stat, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
}

#[derive(Default)]
struct StoreInner {
    counters: RwLock<AHashMap<String, Counter>>,
    gauges: RwLock<AHashMap<String, Gauge>>,
}

impl StoreInner {
    fn counter(&self, name: String) -> Counter {
        if let Some(counter) = self.counters.read().get(&name) {
            return counter.clone();
        }
        self.counters.write().entry(name).or_default().clone()
    }

    fn gauge(&self, name: String) -> Gauge {
        if let Some(gauge) = self.gauges.read().get(&name) {
            return gauge.clone();
        }
        self.gauges.write().entry(name).or_default().clone()
    }
}

/// Thread-safe in-memory stats store.
///
/// Stats are created on first lookup and live as long as the store.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_scope(&self) -> Arc<dyn Scope> {
        Arc::new(StoreScope {
            inner: Arc::clone(&self.inner),
            prefix: String::new(),
        })
    }

    pub fn counter_value(&self, name: &str) -> Option<u64> {
        self.inner.counters.read().get(name).map(Counter::value)
    }

    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.inner.gauges.read().get(name).map(Gauge::value)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            counters: self
                .inner
                .counters
                .read()
                .iter()
                .map(|(name, c)| (name.clone(), c.value()))
                .collect(),
            gauges: self
                .inner
                .gauges
                .read()
                .iter()
                .map(|(name, g)| (name.clone(), g.value()))
                .collect(),
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("counters", &self.inner.counters.read().len())
            .field("gauges", &self.inner.gauges.read().len())
            .finish()
    }
}

struct StoreScope {
    inner: Arc<StoreInner>,
    prefix: String,
}

impl StoreScope {
    fn full_name(&self, name: &str) -> String {
        let mut full = String::with_capacity(self.prefix.len() + name.len());
        full.push_str(&self.prefix);
        full.push_str(name);
        full
    }
}

impl Scope for StoreScope {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn counter(&self, name: &str) -> Counter {
        self.inner.counter(self.full_name(name))
    }

    fn gauge(&self, name: &str) -> Gauge {
        self.inner.gauge(self.full_name(name))
    }

    fn create_scope(&self, name: &str) -> Arc<dyn Scope> {
        let mut prefix = self.full_name(name.trim_end_matches('.'));
        prefix.push('.');
        Arc::new(StoreScope {
            inner: Arc::clone(&self.inner),
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::StatNamePool;

    #[test]
    fn test_counters_are_shared_by_name() {
        let store = Store::new();
        let scope = store.root_scope();
        scope.counter("a").inc();
        scope.counter("a").add(2);
        assert_eq!(store.counter_value("a"), Some(3));
        assert_eq!(store.counter_value("b"), None);
    }

    #[test]
    fn test_child_scopes_prefix_names() {
        let store = Store::new();
        let listener = store.root_scope().create_scope("listener.udp_443");
        let worker = listener.create_scope("worker_0.");
        assert_eq!(worker.prefix(), "listener.udp_443.worker_0.");

        worker.gauge("downstream_cx_active").inc();
        worker.gauge("downstream_cx_active").inc();
        worker.gauge("downstream_cx_active").dec();
        assert_eq!(
            store.gauge_value("listener.udp_443.worker_0.downstream_cx_active"),
            Some(1)
        );
    }

    #[test]
    fn test_stat_names_join_with_dots() {
        let pool = StatNamePool::new();
        let store = Store::new();
        let scope = store.root_scope();
        let names = [pool.intern("http3"), pool.intern("downstream"), pool.intern("tx")];
        scope.increment_counter(&names);
        scope.increment_counter(&names);
        assert_eq!(store.counter_value("http3.downstream.tx"), Some(2));
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let store = Store::new();
        let scope = store.root_scope();
        scope.counter("b").inc();
        scope.counter("a").inc();
        scope.gauge("g").set(-4);

        let snapshot = store.snapshot();
        let names: Vec<_> = snapshot.counters.keys().cloned().collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(snapshot.gauges.get("g"), Some(&-4));
    }
}
