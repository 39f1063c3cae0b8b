//! Snapshot bus - pub/sub fan-out of flushed snapshots
//!
//! Trackers publish every flushed snapshot here; push subscribers receive
//! them with minimal latency. The bus carries already-throttled data, so
//! volume is bounded by the flush interval, not by raw pipeline events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::progress::SessionSnapshot;

/// Default channel capacity (snapshots)
///
/// Flushes are throttled to one per couple of seconds per session, so even
/// a few hundred concurrent sessions stay far below this.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Central fan-out for flushed session snapshots
///
/// Subscribers filter by session id themselves; one bus serves the whole
/// daemon. Emitting is fire-and-forget: with no subscribers the snapshot is
/// simply dropped (the store still has it for pull).
pub struct SnapshotBus {
    tx: broadcast::Sender<SessionSnapshot>,
}

impl SnapshotBus {
    /// Create a new bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "SnapshotBus::new: creating bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Publish a flushed snapshot to all subscribers
    pub fn emit(&self, snapshot: SessionSnapshot) {
        debug!(
            session_id = %snapshot.session_id,
            phase = %snapshot.current_phase,
            overall = snapshot.overall_percentage,
            "SnapshotBus::emit"
        );
        // Ignore send errors (no subscribers is OK)
        let _ = self.tx.send(snapshot);
    }

    /// Subscribe to receive all snapshots flushed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        debug!("SnapshotBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SnapshotBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create a snapshot bus wrapped in an Arc for shared ownership
pub fn create_snapshot_bus() -> Arc<SnapshotBus> {
    Arc::new(SnapshotBus::with_default_capacity())
}
