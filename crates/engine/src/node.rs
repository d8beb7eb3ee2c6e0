use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity for a graph node. Used by subscriber
/// registries and the cycle check; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Upstream relationship of a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubPhase {
    /// Subscribed to its upstream provider(s) and receiving events.
    Streaming,
    /// Detached from upstream; its cache stays queryable and its own
    /// subscribers keep observing the now-stale output.
    Detached,
}
