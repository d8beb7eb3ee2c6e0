use std::rc::Rc;

use tracing::{debug, warn};

use streamta_core::{StreamError, TimeSeries, Timestamped, Upsert};

use crate::event::StreamEvent;
use crate::node::NodeId;
use crate::observer::{SharedObserver, SubscriberRegistry, WeakObserver};

/// The provider half embedded in every graph node: an exclusively-owned
/// ordered cache plus a registry of weak subscriber handles.
///
/// All mutations are all-or-nothing: if any downstream recompute fails,
/// the local change is undone and already-notified subscribers are
/// resynchronized with a best-effort rebuild before the error returns.
#[derive(Debug)]
pub struct Publisher<T> {
    id: NodeId,
    series: TimeSeries<T>,
    subscribers: Vec<(NodeId, WeakObserver<T>)>,
    closed: bool,
    max_cache: Option<usize>,
}

impl<T: Timestamped> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Timestamped> Publisher<T> {
    pub fn new() -> Self {
        Self {
            id: NodeId::next(),
            series: TimeSeries::new(),
            subscribers: Vec::new(),
            closed: false,
            max_cache: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn series(&self) -> &TimeSeries<T> {
        &self.series
    }

    pub(crate) fn series_mut(&mut self) -> &mut TimeSeries<T> {
        &mut self.series
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn max_cache(&self) -> Option<usize> {
        self.max_cache
    }

    pub fn set_max_cache(&mut self, max_cache: Option<usize>) {
        self.max_cache = max_cache;
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    // -----------------------------------------------------------------------
    // Subscription registry
    // -----------------------------------------------------------------------

    /// Registers a subscriber and catches it up on existing history.
    /// Idempotent: double-subscribing is a no-op. Fails with
    /// [`StreamError::CycleDetected`] when this provider is already
    /// reachable downstream of the candidate.
    pub fn subscribe(&mut self, observer: &SharedObserver<T>) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::ProviderClosed);
        }
        let observer_id = observer.borrow().node_id();
        if self.subscribers.iter().any(|(id, _)| *id == observer_id) {
            return Ok(());
        }
        if observer_id == self.id || observer.borrow().reaches(self.id) {
            return Err(StreamError::CycleDetected);
        }
        self.subscribers.push((observer_id, Rc::downgrade(observer)));

        // catch the newcomer up on existing history, privately
        let catch_up = observer
            .borrow_mut()
            .on_event(StreamEvent::Rebuild(0), self.series.as_slice());
        if let Err(e) = catch_up {
            self.subscribers.retain(|(id, _)| *id != observer_id);
            return Err(e);
        }
        Ok(())
    }

    /// Removes a subscriber by id. Idempotent.
    pub fn unsubscribe(&mut self, id: NodeId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// True when `target` is reachable through this node's subscribers.
    /// Ids are compared before any node is borrowed, so the check is
    /// safe to run while the target itself is mutably borrowed.
    pub fn reaches(&self, target: NodeId) -> bool {
        for (id, weak) in &self.subscribers {
            if *id == target {
                return true;
            }
            if let Some(observer) = weak.upgrade() {
                if observer.borrow().reaches(target) {
                    return true;
                }
            }
        }
        false
    }

    /// Unsubscribes every subscriber, delivering an end notification to
    /// each so it can release its upstream back-reference, then marks
    /// the publisher closed. Idempotent.
    pub fn end_transmission(&mut self) {
        if self.closed {
            return;
        }
        for (_, weak) in std::mem::take(&mut self.subscribers) {
            if let Some(observer) = weak.upgrade() {
                observer.borrow_mut().on_end();
            }
        }
        self.closed = true;
        debug!("transmission ended");
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Appends an item with a strictly newer timestamp and notifies
    /// subscribers in subscription order before returning. Returns the
    /// new position.
    pub fn append(&mut self, item: T) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::ProviderClosed);
        }
        let index = self.series.append(item)?;
        if let Err(e) = self.notify(StreamEvent::Added(index)) {
            self.series.truncate_from(index);
            self.resync(index);
            return Err(e);
        }
        self.prune();
        Ok(index)
    }

    /// Places an item whose timestamp is at or before the current
    /// maximum: an exact match overwrites the existing record, a missing
    /// timestamp is inserted at its sorted position. A timestamp newer
    /// than everything cached degrades gracefully to an append. Returns
    /// the affected position.
    pub fn insert(&mut self, item: T) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::ProviderClosed);
        }
        match self.series.upsert(item) {
            Upsert::Appended(index) => {
                if let Err(e) = self.notify(StreamEvent::Added(index)) {
                    self.series.truncate_from(index);
                    self.resync(index);
                    return Err(e);
                }
                self.prune();
                Ok(index)
            }
            Upsert::Overwritten { index, previous } => {
                if let Err(e) = self.notify(StreamEvent::Overwritten(index)) {
                    self.series.replace(index, previous);
                    self.resync(index);
                    return Err(e);
                }
                Ok(index)
            }
            Upsert::Inserted(index) => {
                if let Err(e) = self.notify(StreamEvent::Inserted(index)) {
                    self.series.remove(index);
                    self.resync(index);
                    return Err(e);
                }
                Ok(index)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Notification
    // -----------------------------------------------------------------------

    /// Sends an event with a snapshot of the cache to every live
    /// subscriber, in subscription order, failing fast on the first
    /// subscriber error. Dead weak handles are pruned on the way.
    pub(crate) fn notify(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        self.subscribers.retain(|(_, weak)| weak.strong_count() > 0);
        let handles: Vec<WeakObserver<T>> =
            self.subscribers.iter().map(|(_, weak)| weak.clone()).collect();
        for weak in handles {
            if let Some(observer) = weak.upgrade() {
                observer
                    .borrow_mut()
                    .on_event(event, self.series.as_slice())?;
            }
        }
        Ok(())
    }

    /// Best-effort rebuild broadcast, used to resynchronize subscribers
    /// after a failed cascade was rolled back.
    pub(crate) fn resync(&mut self, from: usize) {
        if let Err(e) = self.notify(StreamEvent::Rebuild(from)) {
            warn!(error = %e, "resynchronization rebuild failed; downstream state may be stale");
        }
    }

    /// Evicts the oldest entries past the configured bound. Strict FIFO
    /// by position, and deliberately silent: subscribers are told about
    /// new data, not about truncation of history they never queried.
    pub(crate) fn prune(&mut self) {
        if let Some(max) = self.max_cache {
            if self.series.len() > max {
                let excess = self.series.len() - max;
                self.series.evict_front(excess);
                debug!(evicted = excess, bound = max, "pruned cache");
            }
        }
    }
}

/// A node whose output series other nodes can chain from.
pub trait ChainSource<T: Timestamped>: SubscriberRegistry {
    fn publisher(&self) -> &Publisher<T>;
    fn publisher_mut(&mut self) -> &mut Publisher<T>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::StreamObserver;
    use crate::support::{point, recorder, recorder_with_log, ts};
    use rust_decimal_macros::dec;
    use streamta_core::PricePoint;

    #[test]
    fn subscribe_is_idempotent() {
        let mut publisher: Publisher<PricePoint> = Publisher::new();
        let (rec, _log) = recorder();
        let obs: SharedObserver<PricePoint> = rec.clone();
        publisher.subscribe(&obs).unwrap();
        publisher.subscribe(&obs).unwrap();
        assert_eq!(publisher.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut publisher: Publisher<PricePoint> = Publisher::new();
        let (rec, _log) = recorder();
        let obs: SharedObserver<PricePoint> = rec.clone();
        publisher.subscribe(&obs).unwrap();
        let id = rec.borrow().node_id();
        assert!(publisher.unsubscribe(id));
        assert!(!publisher.unsubscribe(id));
    }

    #[test]
    fn append_notifies_in_subscription_order() {
        let mut publisher: Publisher<PricePoint> = Publisher::new();
        let (rec_a, log) = recorder();
        let (rec_b, _) = recorder_with_log(&log);
        let obs_a: SharedObserver<PricePoint> = rec_a.clone();
        let obs_b: SharedObserver<PricePoint> = rec_b.clone();
        publisher.subscribe(&obs_a).unwrap();
        publisher.subscribe(&obs_b).unwrap();

        publisher.append(point(1, dec!(10))).unwrap();

        let entries = log.borrow().clone();
        // catch-up rebuilds first, then the add fan-out in order
        let adds: Vec<_> = entries
            .iter()
            .filter(|(_, e)| matches!(e, StreamEvent::Added(_)))
            .collect();
        assert_eq!(adds.len(), 2);
        assert_eq!(adds[0].0, rec_a.borrow().node_id());
        assert_eq!(adds[1].0, rec_b.borrow().node_id());
    }

    #[test]
    fn end_transmission_closes_and_clears() {
        let mut publisher: Publisher<PricePoint> = Publisher::new();
        let (rec, _log) = recorder();
        let obs: SharedObserver<PricePoint> = rec.clone();
        publisher.subscribe(&obs).unwrap();

        publisher.end_transmission();
        publisher.end_transmission(); // idempotent
        assert!(publisher.is_closed());
        assert_eq!(publisher.subscriber_count(), 0);
        assert!(rec.borrow().ended);

        let err = publisher.append(point(1, dec!(1))).unwrap_err();
        assert_eq!(err, StreamError::ProviderClosed);
        let err = publisher.insert(point(1, dec!(1))).unwrap_err();
        assert_eq!(err, StreamError::ProviderClosed);
    }

    #[test]
    fn pruning_is_bounded_and_silent() {
        let mut publisher: Publisher<PricePoint> = Publisher::new();
        publisher.set_max_cache(Some(3));
        let (rec, log) = recorder();
        let obs: SharedObserver<PricePoint> = rec.clone();
        publisher.subscribe(&obs).unwrap();

        for i in 1..=6 {
            publisher.append(point(i, dec!(1))).unwrap();
        }

        assert_eq!(publisher.series().len(), 3);
        assert_eq!(publisher.series().first().unwrap().timestamp, ts(4));
        // one catch-up rebuild, then only Added events — nothing for eviction
        let spurious = log
            .borrow()
            .iter()
            .filter(|(_, e)| !matches!(e, StreamEvent::Added(_) | StreamEvent::Rebuild(0)))
            .count();
        assert_eq!(spurious, 0);
    }
}
