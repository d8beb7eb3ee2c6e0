use chrono::{DateTime, Utc};

/// Errors surfaced by the streaming engine.
///
/// Every mutation of the graph returns synchronously; there is no
/// deferred error channel. Warm-up gaps on the hot path are expressed
/// as `None` values, not errors — `InsufficientHistory` is raised only
/// by batch entry points that demand a minimum length upfront.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// `append` was called with a timestamp at or before the cache
    /// maximum; the caller should use `insert` for corrections and
    /// late arrivals.
    #[error("out-of-order timestamp {timestamp}: not after {last}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// Operation on a provider that already ended transmission.
    #[error("provider is closed")]
    ProviderClosed,

    /// A batch call demanded more history than was supplied.
    #[error("insufficient history: needed {needed}, have {have}")]
    InsufficientHistory { needed: usize, have: usize },

    /// The requested subscription would close a cycle in the
    /// dependency graph.
    #[error("subscription would create a cycle")]
    CycleDetected,

    /// An indicator plug-in failed to compute its next value.
    #[error("indicator fault: {0}")]
    Fault(String),
}
