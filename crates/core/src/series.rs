use chrono::{DateTime, Utc};

use crate::error::StreamError;
use crate::traits::Timestamped;

/// How an item landed in a [`TimeSeries`] via [`TimeSeries::upsert`].
#[derive(Debug)]
pub enum Upsert<T> {
    /// Timestamp was newer than everything cached; appended at the end.
    Appended(usize),
    /// Timestamp matched an existing record, which was replaced.
    /// Carries the previous record so callers can roll back.
    Overwritten { index: usize, previous: T },
    /// Timestamp was missing; inserted at its sorted position.
    Inserted(usize),
}

/// An ordered, timestamp-unique sequence of items.
///
/// Invariant: timestamps are strictly increasing by position. The series
/// is exclusively owned by its node; consumers only ever see `&[T]`
/// slices carried by notification events, or copies.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries<T> {
    items: Vec<T>,
}

impl<T: Timestamped> TimeSeries<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Exact-match position of a timestamp, by binary search.
    pub fn index_of(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.items
            .binary_search_by_key(&timestamp, |item| item.timestamp())
            .ok()
    }

    /// First position whose timestamp is at or after `timestamp`.
    pub fn lower_bound(&self, timestamp: DateTime<Utc>) -> usize {
        self.items
            .partition_point(|item| item.timestamp() < timestamp)
    }

    /// First position whose timestamp is strictly after `timestamp`.
    pub fn upper_bound(&self, timestamp: DateTime<Utc>) -> usize {
        self.items
            .partition_point(|item| item.timestamp() <= timestamp)
    }

    /// Appends an item whose timestamp must be strictly greater than the
    /// current maximum. Returns the new item's position.
    pub fn append(&mut self, item: T) -> Result<usize, StreamError> {
        if let Some(last) = self.items.last() {
            if item.timestamp() <= last.timestamp() {
                return Err(StreamError::OutOfOrder {
                    timestamp: item.timestamp(),
                    last: last.timestamp(),
                });
            }
        }
        self.items.push(item);
        Ok(self.items.len() - 1)
    }

    /// Places an item by timestamp: append if newer than everything,
    /// replace on an exact match, otherwise insert at the sorted
    /// position (binary-search locate, linear shift).
    pub fn upsert(&mut self, item: T) -> Upsert<T> {
        let ts = item.timestamp();
        match self.items.last() {
            None => {
                self.items.push(item);
                Upsert::Appended(0)
            }
            Some(last) if ts > last.timestamp() => {
                self.items.push(item);
                Upsert::Appended(self.items.len() - 1)
            }
            _ => match self.index_of(ts) {
                Some(index) => {
                    let previous = std::mem::replace(&mut self.items[index], item);
                    Upsert::Overwritten { index, previous }
                }
                None => {
                    let index = self.lower_bound(ts);
                    self.items.insert(index, item);
                    Upsert::Inserted(index)
                }
            },
        }
    }

    /// Replaces the record at `index`, returning the previous one.
    /// The replacement must carry the same timestamp.
    pub fn replace(&mut self, index: usize, item: T) -> T {
        debug_assert_eq!(self.items[index].timestamp(), item.timestamp());
        std::mem::replace(&mut self.items[index], item)
    }

    /// Removes and returns the record at `index`.
    pub fn remove(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    /// Removes every record from `index` onward, returning the tail.
    pub fn truncate_from(&mut self, index: usize) -> Vec<T> {
        if index >= self.items.len() {
            return Vec::new();
        }
        self.items.split_off(index)
    }

    /// Re-attaches a tail previously taken by [`Self::truncate_from`].
    /// The tail must continue the series' timestamp order.
    pub fn restore_tail(&mut self, tail: Vec<T>) {
        debug_assert!(match (self.items.last(), tail.first()) {
            (Some(a), Some(b)) => a.timestamp() < b.timestamp(),
            _ => true,
        });
        self.items.extend(tail);
    }

    /// Evicts the oldest `count` records (FIFO by position).
    pub fn evict_front(&mut self, count: usize) {
        let count = count.min(self.items.len());
        self.items.drain(..count);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PricePoint;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(i: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, i, 0).unwrap()
    }

    fn point(i: u32, value: rust_decimal::Decimal) -> PricePoint {
        PricePoint::some(ts(i), value)
    }

    #[test]
    fn append_keeps_order_and_rejects_stale() {
        let mut series = TimeSeries::new();
        assert_eq!(series.append(point(1, dec!(10))).unwrap(), 0);
        assert_eq!(series.append(point(2, dec!(11))).unwrap(), 1);

        let err = series.append(point(2, dec!(12))).unwrap_err();
        assert!(matches!(err, StreamError::OutOfOrder { .. }));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn upsert_overwrites_matching_timestamp() {
        let mut series = TimeSeries::new();
        series.append(point(1, dec!(10))).unwrap();
        series.append(point(2, dec!(11))).unwrap();

        match series.upsert(point(1, dec!(99))) {
            Upsert::Overwritten { index, previous } => {
                assert_eq!(index, 0);
                assert_eq!(previous.value, Some(dec!(10)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(series.get(0).unwrap().value, Some(dec!(99)));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn upsert_inserts_missing_timestamp_in_order() {
        let mut series = TimeSeries::new();
        series.append(point(1, dec!(10))).unwrap();
        series.append(point(3, dec!(12))).unwrap();

        match series.upsert(point(2, dec!(11))) {
            Upsert::Inserted(index) => assert_eq!(index, 1),
            other => panic!("unexpected: {other:?}"),
        }
        let values: Vec<_> = series.iter().map(|p| p.value.unwrap()).collect();
        assert_eq!(values, vec![dec!(10), dec!(11), dec!(12)]);
    }

    #[test]
    fn bounds_and_lookup() {
        let mut series = TimeSeries::new();
        for i in [1, 3, 5] {
            series.append(point(i, dec!(1))).unwrap();
        }
        assert_eq!(series.index_of(ts(3)), Some(1));
        assert_eq!(series.index_of(ts(2)), None);
        assert_eq!(series.lower_bound(ts(3)), 1);
        assert_eq!(series.lower_bound(ts(4)), 2);
        assert_eq!(series.upper_bound(ts(3)), 2);
        assert_eq!(series.upper_bound(ts(6)), 3);
    }

    #[test]
    fn truncate_and_restore_round_trip() {
        let mut series = TimeSeries::new();
        for i in 1..=5 {
            series.append(point(i, dec!(1))).unwrap();
        }
        let tail = series.truncate_from(3);
        assert_eq!(series.len(), 3);
        assert_eq!(tail.len(), 2);
        series.restore_tail(tail);
        assert_eq!(series.len(), 5);
        assert_eq!(series.last().unwrap().timestamp, ts(5));
    }

    #[test]
    fn evict_front_is_fifo() {
        let mut series = TimeSeries::new();
        for i in 1..=4 {
            series.append(point(i, dec!(1))).unwrap();
        }
        series.evict_front(2);
        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().timestamp, ts(3));
    }
}
