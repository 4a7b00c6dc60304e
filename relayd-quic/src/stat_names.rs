//! Lazily interned stat names for QUIC connection-close counters.
//!
//! Counter names look like
//! `http3.downstream.tx.quic_connection_close_error_code_QUIC_NO_ERROR`:
//! `tx` when this side closed the connection, `rx` when the peer did.

use crate::error::{ConnectionCloseSource, QuicErrorCode};
use once_cell::sync::OnceCell;
use relayd_stats::{Scope, StatName, StatNamePool};
use std::fmt;

const CONNECTION_CLOSE_PREFIX: &str = "quic_connection_close_error_code_";

/// Shared by every worker. Each error code's name is interned at most once.
pub struct QuicStatNames {
    pool: StatNamePool,
    http3_prefix: StatName,
    downstream: StatName,
    upstream: StatName,
    from_self: StatName,
    from_peer: StatName,
    connection_error_stat_names: [OnceCell<StatName>; QuicErrorCode::COUNT],
}

impl QuicStatNames {
    pub fn new() -> Self {
        let pool = StatNamePool::new();
        Self {
            http3_prefix: pool.intern("http3"),
            downstream: pool.intern("downstream"),
            upstream: pool.intern("upstream"),
            from_self: pool.intern("tx"),
            from_peer: pool.intern("rx"),
            connection_error_stat_names: std::array::from_fn(|_| OnceCell::new()),
            pool,
        }
    }

    /// Increment the close counter for `error_code` in `scope`.
    pub fn charge_connection_close_stat(
        &self,
        scope: &dyn Scope,
        error_code: QuicErrorCode,
        source: ConnectionCloseSource,
        is_upstream: bool,
    ) {
        let direction = if is_upstream {
            &self.upstream
        } else {
            &self.downstream
        };
        let origin = match source {
            ConnectionCloseSource::FromSelf => &self.from_self,
            ConnectionCloseSource::FromPeer => &self.from_peer,
        };
        scope.increment_counter(&[
            self.http3_prefix.clone(),
            direction.clone(),
            origin.clone(),
            self.connection_close_stat_name(error_code),
        ]);
    }

    fn connection_close_stat_name(&self, error_code: QuicErrorCode) -> StatName {
        self.connection_error_stat_names[error_code.index()]
            .get_or_init(|| {
                self.pool
                    .intern(&format!("{CONNECTION_CLOSE_PREFIX}{}", error_code.name()))
            })
            .clone()
    }

    /// Number of distinct names interned so far.
    pub fn interned_len(&self) -> usize {
        self.pool.len()
    }
}

impl Default for QuicStatNames {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QuicStatNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .connection_error_stat_names
            .iter()
            .filter(|slot| slot.get().is_some())
            .count();
        f.debug_struct("QuicStatNames")
            .field("cached_error_codes", &cached)
            .finish()
    }
}
