use std::cell::RefCell;
use std::rc::{Rc, Weak};

use streamta_core::{StreamError, Timestamped};

use crate::event::StreamEvent;
use crate::node::NodeId;

// ---------------------------------------------------------------------------
// Observer contract
// ---------------------------------------------------------------------------

/// Downstream half of a subscription edge.
///
/// Handlers run synchronously on the notifying thread and must either
/// complete their whole cascade or roll their local changes back before
/// returning an error.
pub trait StreamObserver<T: Timestamped> {
    fn node_id(&self) -> NodeId;

    /// Handle one upstream change. `upstream` is a read-only snapshot of
    /// the upstream cache *after* the change was applied; observers must
    /// copy what they need and never retain a live alias.
    fn on_event(&mut self, event: StreamEvent, upstream: &[T]) -> Result<(), StreamError>;

    /// The upstream ended transmission: release the back-reference.
    /// The observer's own cache and subscribers are unaffected.
    fn on_end(&mut self);

    /// True when `target` is reachable through this node's subscribers.
    /// Drives the construction-time cycle check; implementations compare
    /// registered ids before borrowing any node.
    fn reaches(&self, target: NodeId) -> bool;
}

/// Shared handle to a subscriber, as registered with a provider.
pub type SharedObserver<T> = Rc<RefCell<dyn StreamObserver<T>>>;

/// Weak handle kept inside a provider's registry. The provider never
/// owns subscriber lifetime; dead handles are pruned lazily.
pub type WeakObserver<T> = Weak<RefCell<dyn StreamObserver<T>>>;

// ---------------------------------------------------------------------------
// Upstream back-reference
// ---------------------------------------------------------------------------

/// The one capability a hub needs from its upstream after attachment:
/// removing itself from the subscriber registry. Type-erased so hubs can
/// hang off any provider regardless of item type.
pub trait SubscriberRegistry {
    /// Removes the subscriber with the given id. Idempotent: removing a
    /// non-subscriber is a no-op. Returns whether anything was removed.
    fn unsubscribe_node(&mut self, id: NodeId) -> bool;
}

/// Weak, type-erased handle from a hub back to its upstream provider.
pub type UpstreamHandle = Weak<RefCell<dyn SubscriberRegistry>>;
