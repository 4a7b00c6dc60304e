//! relayd-stats: the statistics sink shared by every worker.
//!
//! Counters and gauges are plain atomics handed out by a [`Scope`]. Names that
//! are built repeatedly on hot paths are interned once in a [`StatNamePool`]
//! and passed around as cheap [`StatName`] handles.

pub mod listener;
pub mod store;
pub mod symbol;

pub use listener::{ListenerStats, PerWorkerListenerStats};
pub use store::{join_stat_names, Counter, Gauge, Scope, StatsSnapshot, Store};
pub use symbol::{StatName, StatNamePool};
