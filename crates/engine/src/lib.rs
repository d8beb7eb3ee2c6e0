//! Push-based incremental computation graph for time-series indicators.
//!
//! A root [`SourceHub`] receives quotes from an external feed; chained
//! [`StreamHub`]s each convert one upstream change into one downstream
//! change using constant-size state, and rebuild their tail when a
//! correction or late arrival invalidates it. Propagation is synchronous
//! and single-threaded: an append walks the whole downstream subgraph
//! before it returns.

pub mod batch;
pub mod buffer;
pub mod event;
pub mod hub;
pub mod node;
pub mod observer;
pub mod pair;
pub mod publisher;
pub mod source;

#[cfg(test)]
mod support;

pub use batch::{transform, transform_strict};
pub use buffer::BufferList;
pub use event::StreamEvent;
pub use hub::{HubState, StreamHub};
pub use node::{HubPhase, NodeId};
pub use observer::{SharedObserver, StreamObserver, SubscriberRegistry};
pub use pair::{PairHub, PairState};
pub use publisher::{ChainSource, Publisher};
pub use source::{QuoteHub, SourceHub};
