use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use streamta_core::{Chainable, StreamError, Timestamped};
use streamta_engine::{
    transform, transform_strict, BufferList, ChainSource, HubState, StreamHub,
};

/// Simple Moving Average (SMA) over the last `period` chain values.
///
/// Keeps a fixed-size ring plus a running sum, so each step is O(1).
/// Inputs without a defined chain value (upstream warm-up) pass through
/// untouched and produce a `None` result for their position.
#[derive(Debug, Clone)]
pub struct Sma<I> {
    len: usize,
    buffer: VecDeque<Decimal>,
    sum: Decimal,
    _input: PhantomData<I>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmaResult {
    pub timestamp: DateTime<Utc>,
    pub sma: Option<Decimal>,
}

impl<I> Sma<I> {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "SMA period must be > 0");
        Self {
            len: period,
            buffer: VecDeque::with_capacity(period),
            sum: Decimal::ZERO,
            _input: PhantomData,
        }
    }

    fn value(&self) -> Option<Decimal> {
        if self.buffer.len() == self.len {
            Some(self.sum / Decimal::from(self.len))
        } else {
            None
        }
    }
}

impl<I: Chainable + Clone> HubState for Sma<I> {
    type In = I;
    type Out = SmaResult;

    fn apply(&mut self, item: &I) -> Result<SmaResult, StreamError> {
        let sma = match item.chain_value() {
            Some(value) => {
                self.sum += value;
                self.buffer.push_back(value);
                if self.buffer.len() > self.len {
                    if let Some(removed) = self.buffer.pop_front() {
                        self.sum -= removed;
                    }
                }
                self.value()
            }
            None => None,
        };
        Ok(SmaResult {
            timestamp: item.timestamp(),
            sma,
        })
    }

    fn warmup(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sum = Decimal::ZERO;
    }
}

impl Timestamped for SmaResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Chainable for SmaResult {
    fn chain_value(&self) -> Option<Decimal> {
        self.sma
    }
}

/// Streaming form: an SMA hub chained onto `upstream`.
pub fn sma_hub<U, I>(
    upstream: &Rc<RefCell<U>>,
    period: usize,
) -> Result<Rc<RefCell<StreamHub<Sma<I>>>>, StreamError>
where
    U: ChainSource<I> + 'static,
    I: Chainable + Clone + 'static,
{
    StreamHub::attach(upstream, Sma::new(period))
}

/// Series form: one-shot SMA over a sorted history.
pub fn sma_series<I: Chainable + Clone>(
    items: &[I],
    period: usize,
) -> Result<Vec<SmaResult>, StreamError> {
    transform(Sma::new(period), items)
}

/// Series form that fails with [`StreamError::InsufficientHistory`] when
/// the history is shorter than `period`.
pub fn sma_series_strict<I: Chainable + Clone>(
    items: &[I],
    period: usize,
) -> Result<Vec<SmaResult>, StreamError> {
    transform_strict(Sma::new(period), items)
}

/// Buffer form: an incrementally-appendable SMA list.
pub fn sma_buffer<I: Chainable + Clone>(period: usize) -> BufferList<Sma<I>> {
    BufferList::new(Sma::new(period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use streamta_core::PricePoint;

    fn point(i: u32, value: Decimal) -> PricePoint {
        PricePoint::some(Utc.with_ymd_and_hms(2024, 1, 1, 0, i, 0).unwrap(), value)
    }

    #[test]
    fn test_sma_basic() {
        let items: Vec<_> = [dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)]
            .into_iter()
            .enumerate()
            .map(|(i, v)| point(i as u32, v))
            .collect();
        let out = sma_series(&items, 3).unwrap();
        let values: Vec<_> = out.iter().map(|r| r.sma).collect();
        assert_eq!(
            values,
            vec![None, None, Some(dec!(2)), Some(dec!(3)), Some(dec!(4))]
        );
    }

    #[test]
    fn test_sma_skips_undefined_inputs() {
        let mut sma = Sma::<PricePoint>::new(2);
        let gap = PricePoint::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap(), None);
        let out = sma.apply(&gap).unwrap();
        assert_eq!(out.sma, None);
        // the gap did not enter the window
        sma.apply(&point(2, dec!(10))).unwrap();
        let out = sma.apply(&point(3, dec!(20))).unwrap();
        assert_eq!(out.sma, Some(dec!(15)));
    }

    #[test]
    #[should_panic(expected = "period must be > 0")]
    fn test_sma_rejects_zero_period() {
        Sma::<PricePoint>::new(0);
    }
}
