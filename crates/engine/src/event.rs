/// A change notification delivered to subscribers, carrying the affected
/// position in the upstream cache. Every event also carries a read-only
/// snapshot of the upstream cache (see
/// [`StreamObserver::on_event`](crate::observer::StreamObserver::on_event)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new item was appended at the given position (the hot path).
    Added(usize),
    /// The record at the given position was replaced by a correction.
    Overwritten(usize),
    /// A late arrival was inserted at the given sorted position.
    Inserted(usize),
    /// The upstream cache changed wholesale from the given position;
    /// subscribers must discard derived output from there and replay.
    /// Also used to catch a new subscriber up (`Rebuild(0)`) and to
    /// resynchronize after a rolled-back cascade.
    Rebuild(usize),
}

impl StreamEvent {
    /// The first upstream position affected by this event.
    pub fn position(&self) -> usize {
        match self {
            StreamEvent::Added(i)
            | StreamEvent::Overwritten(i)
            | StreamEvent::Inserted(i)
            | StreamEvent::Rebuild(i) => *i,
        }
    }
}
