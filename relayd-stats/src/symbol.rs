//! Stat-name interning.

use ahash::AHashSet;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Interned stat-name fragment.
///
/// Cloning is a reference-count bump. Two names from the same pool with equal
/// content share one allocation.
#[derive(Clone, Eq)]
pub struct StatName(Arc<str>);

impl StatName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether both handles point at the same pool entry.
    pub fn ptr_eq(&self, other: &StatName) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for StatName {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl Hash for StatName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Borrow<str> for StatName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatName({:?})", &*self.0)
    }
}

/// Append-only interning pool.
///
/// Entries are never removed, so a handle stays valid and canonical for the
/// lifetime of the process.
#[derive(Default)]
pub struct StatNamePool {
    names: Mutex<AHashSet<StatName>>,
}

impl StatNamePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical handle for `name`, adding it on first use.
    pub fn intern(&self, name: &str) -> StatName {
        let mut names = self.names.lock();
        if let Some(existing) = names.get(name) {
            return existing.clone();
        }
        let interned = StatName(Arc::from(name));
        names.insert(interned.clone());
        interned
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for StatNamePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatNamePool").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_intern_returns_canonical_handle() {
        let pool = StatNamePool::new();
        let a = pool.intern("http3");
        let b = pool.intern("http3");
        assert!(a.ptr_eq(&b));
        assert_eq!(pool.len(), 1);

        let c = pool.intern("downstream");
        assert!(!a.ptr_eq(&c));
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_interning_converges() {
        let pool = Arc::new(StatNamePool::new());
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.intern("quic_connection_close_error_code_QUIC_NO_ERROR"))
            })
            .collect();
        let handles: Vec<StatName> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(pool.len(), 1);
        assert!(handles.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }
}
