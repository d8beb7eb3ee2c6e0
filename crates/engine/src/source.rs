use std::cell::RefCell;
use std::rc::Rc;

use streamta_core::{Quote, StreamError, Timestamped};

use crate::node::NodeId;
use crate::observer::SubscriberRegistry;
use crate::publisher::{ChainSource, Publisher};

/// Root of a subscription graph: the node external data enters through.
/// It performs no transform — it validates, caches, and fans out.
pub struct SourceHub<T: Timestamped> {
    publisher: Publisher<T>,
}

/// The usual root: a source of full OHLCV bars.
pub type QuoteHub = SourceHub<Quote>;

impl<T: Timestamped + Clone> SourceHub<T> {
    /// An unbounded source.
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            publisher: Publisher::new(),
        }))
    }

    /// A source that retains at most `max_cache` items, evicting the
    /// oldest first. Hubs attached to it inherit the same bound.
    pub fn bounded(max_cache: usize) -> Rc<RefCell<Self>> {
        let hub = Self::new();
        hub.borrow_mut().publisher.set_max_cache(Some(max_cache));
        hub
    }

    pub fn node_id(&self) -> NodeId {
        self.publisher.id()
    }

    /// The cached input series.
    pub fn items(&self) -> &[T] {
        self.publisher.series().as_slice()
    }

    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Feeds one new item; its timestamp must be strictly newer than the
    /// cached maximum. The full downstream cascade completes (or rolls
    /// back) before this returns.
    pub fn append(&mut self, item: T) -> Result<(), StreamError> {
        self.publisher.append(item)?;
        Ok(())
    }

    /// Feeds a batch in one call. Items are sorted by timestamp first,
    /// then routed through the same paths as single feeds, so a batch
    /// containing corrections behaves identically to feeding them one at
    /// a time.
    pub fn append_many(&mut self, mut items: Vec<T>) -> Result<(), StreamError> {
        items.sort_by_key(|item| item.timestamp());
        for item in items {
            self.insert(item)?;
        }
        Ok(())
    }

    /// Feeds a correction or late arrival: overwrites on an exact
    /// timestamp match, inserts at sorted position otherwise. A
    /// strictly-newer timestamp degrades to a plain append.
    pub fn insert(&mut self, item: T) -> Result<(), StreamError> {
        self.publisher.insert(item)?;
        Ok(())
    }

    /// Permanently closes the source and unsubscribes everything
    /// downstream. Idempotent; feeding afterwards fails with
    /// [`StreamError::ProviderClosed`].
    pub fn end_transmission(&mut self) {
        self.publisher.end_transmission();
    }
}

impl<T: Timestamped + Clone> SubscriberRegistry for SourceHub<T> {
    fn unsubscribe_node(&mut self, id: NodeId) -> bool {
        self.publisher.unsubscribe(id)
    }
}

impl<T: Timestamped + Clone> ChainSource<T> for SourceHub<T> {
    fn publisher(&self) -> &Publisher<T> {
        &self.publisher
    }

    fn publisher_mut(&mut self) -> &mut Publisher<T> {
        &mut self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{point, ts};
    use rust_decimal_macros::dec;
    use streamta_core::PricePoint;

    #[test]
    fn rejects_out_of_order_appends() {
        let source = SourceHub::<PricePoint>::new();
        source.borrow_mut().append(point(2, dec!(1))).unwrap();
        let err = source.borrow_mut().append(point(1, dec!(1))).unwrap_err();
        assert_eq!(
            err,
            StreamError::OutOfOrder {
                timestamp: ts(1),
                last: ts(2),
            }
        );
        // duplicate timestamps are rejected on the append path too
        let err = source.borrow_mut().append(point(2, dec!(1))).unwrap_err();
        assert!(matches!(err, StreamError::OutOfOrder { .. }));
    }

    #[test]
    fn insert_routes_by_timestamp() {
        let source = SourceHub::<PricePoint>::new();
        let mut src = source.borrow_mut();
        src.append(point(1, dec!(1))).unwrap();
        src.append(point(3, dec!(3))).unwrap();

        src.insert(point(2, dec!(2))).unwrap(); // late arrival
        src.insert(point(3, dec!(30))).unwrap(); // correction
        src.insert(point(4, dec!(4))).unwrap(); // newer than everything

        let values: Vec<_> = src.items().iter().map(|p| p.value.unwrap()).collect();
        assert_eq!(values, vec![dec!(1), dec!(2), dec!(30), dec!(4)]);
    }

    #[test]
    fn append_many_sorts_before_feeding() {
        let source = SourceHub::<PricePoint>::new();
        let mut src = source.borrow_mut();
        src.append_many(vec![
            point(3, dec!(3)),
            point(1, dec!(1)),
            point(2, dec!(2)),
        ])
        .unwrap();
        let stamps: Vec<_> = src.items().iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![ts(1), ts(2), ts(3)]);
    }

    #[test]
    fn bounded_source_evicts_oldest() {
        let source = SourceHub::<PricePoint>::bounded(2);
        let mut src = source.borrow_mut();
        for i in 1..=4 {
            src.append(point(i, dec!(1))).unwrap();
        }
        assert_eq!(src.items().len(), 2);
        assert_eq!(src.items()[0].timestamp, ts(3));
    }
}
