//! Per-listener and per-worker context handed to dispatchers and sessions.

use relayd_stats::Scope;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies the worker event loop a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLoopHandle {
    pub worker_id: usize,
}

impl EventLoopHandle {
    pub fn new(worker_id: usize) -> Self {
        Self { worker_id }
    }
}

/// Listener-wide configuration visible to every worker.
pub struct ListenerContext {
    name: String,
    scope: Arc<dyn Scope>,
}

impl ListenerContext {
    pub fn new(name: impl Into<String>, scope: Arc<dyn Scope>) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stats scope of this listener.
    pub fn listener_scope(&self) -> &dyn Scope {
        self.scope.as_ref()
    }
}

impl fmt::Debug for ListenerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerContext")
            .field("name", &self.name)
            .field("scope", &self.scope.prefix())
            .finish()
    }
}

/// Tracks the connections owned by one worker.
pub trait ConnectionHandler: Send + Sync {
    fn inc_num_connections(&self);

    fn dec_num_connections(&self);

    fn num_connections(&self) -> u64;
}

/// Connection handler that only counts.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    connections: AtomicU64,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionHandler for ConnectionCounter {
    fn inc_num_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_num_connections(&self) {
        // Saturate, but a close without a matching open is an accounting bug.
        if self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_err()
        {
            tracing::warn!("connection count decremented below zero");
        }
    }

    fn num_connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_saturates_at_zero() {
        let counter = ConnectionCounter::new();
        counter.inc_num_connections();
        counter.dec_num_connections();
        counter.dec_num_connections();
        assert_eq!(counter.num_connections(), 0);

        counter.inc_num_connections();
        assert_eq!(counter.num_connections(), 1);
    }
}
