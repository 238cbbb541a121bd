//! Provider counters, updated atomically from the hot path and read as a
//! consistent point-in-time snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Size value reported by providers whose backlog is not measurable.
pub const SIZE_UNKNOWN: i64 = -1;

/// Lock-free publish/deliver counters shared between a provider and its
/// subscription loop.
#[derive(Debug, Default)]
pub struct TransportStats {
    /// Successful publishes observed by this provider instance.
    published: AtomicU64,
    /// Messages handed out through a subscription.
    delivered: AtomicU64,
}

impl TransportStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one acknowledged publish.
    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one message accepted by a downstream consumer.
    pub fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot with the given in-flight size.
    ///
    /// Providers that cannot measure their backlog pass [`SIZE_UNKNOWN`].
    #[must_use]
    pub fn snapshot(&self, current_size: i64) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            current_size,
        }
    }
}

/// Point-in-time provider counters.
///
/// `published` and `delivered` are monotonically non-decreasing over the
/// provider's lifetime. `current_size` is the in-flight count, or
/// [`SIZE_UNKNOWN`] when the backend cannot report one (a log-backed
/// provider's backlog lives in the broker, not the process).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Successful publishes.
    pub published: u64,
    /// Messages handed out via subscribe.
    pub delivered: u64,
    /// In-flight count, or −1 if not measurable.
    pub current_size: i64,
}
