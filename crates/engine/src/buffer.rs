use streamta_core::{StreamError, TimeSeries, Timestamped};

use crate::hub::HubState;

/// Standalone incremental accumulator: the same per-step formula as a
/// hub, without the subscription graph. Feed items in timestamp order
/// and read results back; suited to callers that own their event loop.
///
/// An optional capacity bounds the retained results, evicting oldest
/// first. Eviction never changes values: the formula state carries the
/// full history's sufficient statistics regardless of what is retained.
pub struct BufferList<S: HubState> {
    state: S,
    results: TimeSeries<S::Out>,
    max_len: Option<usize>,
}

impl<S: HubState> BufferList<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            results: TimeSeries::new(),
            max_len: None,
        }
    }

    pub fn bounded(state: S, max_len: usize) -> Self {
        Self {
            state,
            results: TimeSeries::new(),
            max_len: Some(max_len),
        }
    }

    /// Consumes one item; its timestamp must be strictly newer than the
    /// last one pushed. The formula state is untouched when this fails.
    pub fn push(&mut self, item: S::In) -> Result<(), StreamError> {
        if let Some(last) = self.results.last() {
            if item.timestamp() <= last.timestamp() {
                return Err(StreamError::OutOfOrder {
                    timestamp: item.timestamp(),
                    last: last.timestamp(),
                });
            }
        }
        let snapshot = self.state.clone();
        let out = match self.state.apply(&item) {
            Ok(out) => out,
            Err(e) => {
                self.state = snapshot;
                return Err(e);
            }
        };
        self.results.append(out)?;
        if let Some(max) = self.max_len {
            if self.results.len() > max {
                let excess = self.results.len() - max;
                self.results.evict_front(excess);
            }
        }
        Ok(())
    }

    /// Consumes a batch, sorting it by timestamp first.
    pub fn extend(&mut self, mut items: Vec<S::In>) -> Result<(), StreamError> {
        items.sort_by_key(|item| item.timestamp());
        for item in items {
            self.push(item)?;
        }
        Ok(())
    }

    pub fn results(&self) -> &[S::Out] {
        self.results.as_slice()
    }

    pub fn latest(&self) -> Option<&S::Out> {
        self.results.last()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Discards all results and returns the formula to its initial state.
    pub fn clear(&mut self) {
        self.state.reset();
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{point, RunningTotal};
    use rust_decimal_macros::dec;

    #[test]
    fn accumulates_in_order() {
        let mut buf = BufferList::new(RunningTotal::new());
        buf.extend(vec![point(2, dec!(2)), point(1, dec!(1))]).unwrap();
        buf.push(point(3, dec!(3))).unwrap();
        let values: Vec<_> = buf.results().iter().map(|p| p.value.unwrap()).collect();
        assert_eq!(values, vec![dec!(1), dec!(3), dec!(6)]);
    }

    #[test]
    fn rejects_stale_pushes_without_corrupting_state() {
        let mut buf = BufferList::new(RunningTotal::new());
        buf.push(point(2, dec!(5))).unwrap();
        assert!(matches!(
            buf.push(point(1, dec!(100))),
            Err(StreamError::OutOfOrder { .. })
        ));
        buf.push(point(3, dec!(5))).unwrap();
        assert_eq!(buf.latest().unwrap().value, Some(dec!(10)));
    }

    #[test]
    fn capacity_bounds_retention_not_values() {
        let mut buf = BufferList::bounded(RunningTotal::new(), 2);
        for i in 1..=5 {
            buf.push(point(i, dec!(1))).unwrap();
        }
        assert_eq!(buf.len(), 2);
        // the running total still reflects everything ever pushed
        assert_eq!(buf.latest().unwrap().value, Some(dec!(5)));
    }

    #[test]
    fn clear_resets_the_formula() {
        let mut buf = BufferList::new(RunningTotal::new());
        buf.push(point(1, dec!(7))).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        buf.push(point(2, dec!(2))).unwrap();
        assert_eq!(buf.latest().unwrap().value, Some(dec!(2)));
    }
}
