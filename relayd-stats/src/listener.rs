//! Connection stats kept per listener and per worker.

use crate::store::{Counter, Gauge, Scope};

/// Downstream connection stats of one listener, summed over all workers.
#[derive(Debug, Clone)]
pub struct ListenerStats {
    pub downstream_cx_total: Counter,
    pub downstream_cx_active: Gauge,
    pub downstream_cx_destroy: Counter,
}

impl ListenerStats {
    pub fn new(scope: &dyn Scope) -> Self {
        Self {
            downstream_cx_total: scope.counter("downstream_cx_total"),
            downstream_cx_active: scope.gauge("downstream_cx_active"),
            downstream_cx_destroy: scope.counter("downstream_cx_destroy"),
        }
    }
}

/// The same connection stats, under `worker_<id>.` in the listener scope.
#[derive(Debug, Clone)]
pub struct PerWorkerListenerStats {
    pub downstream_cx_total: Counter,
    pub downstream_cx_active: Gauge,
}

impl PerWorkerListenerStats {
    pub fn new(scope: &dyn Scope, worker_id: usize) -> Self {
        let scope = scope.create_scope(&format!("worker_{worker_id}"));
        Self {
            downstream_cx_total: scope.counter("downstream_cx_total"),
            downstream_cx_active: scope.gauge("downstream_cx_active"),
        }
    }
}
