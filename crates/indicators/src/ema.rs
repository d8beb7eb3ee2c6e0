use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use streamta_core::{Chainable, StreamError, Timestamped};
use streamta_engine::{
    transform, transform_strict, BufferList, ChainSource, HubState, StreamHub,
};

/// Exponential Moving Average (EMA), seeded with an SMA of the first
/// `period` chain values, then `prev + multiplier * (value - prev)`.
#[derive(Debug, Clone)]
pub struct Ema<I> {
    len: usize,
    multiplier: Decimal,
    current: Option<Decimal>,
    count: usize,
    seed_sum: Decimal,
    _input: PhantomData<I>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmaResult {
    pub timestamp: DateTime<Utc>,
    pub ema: Option<Decimal>,
}

impl<I> Ema<I> {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "EMA period must be > 0");
        let multiplier = Decimal::TWO / (Decimal::from(period) + Decimal::ONE);
        Self {
            len: period,
            multiplier,
            current: None,
            count: 0,
            seed_sum: Decimal::ZERO,
            _input: PhantomData,
        }
    }
}

impl<I: Chainable + Clone> HubState for Ema<I> {
    type In = I;
    type Out = EmaResult;

    fn apply(&mut self, item: &I) -> Result<EmaResult, StreamError> {
        let ema = match item.chain_value() {
            Some(value) => {
                self.count += 1;
                match self.current {
                    None => {
                        self.seed_sum += value;
                        if self.count >= self.len {
                            self.current = Some(self.seed_sum / Decimal::from(self.len));
                        }
                    }
                    Some(prev) => {
                        self.current = Some((value - prev) * self.multiplier + prev);
                    }
                }
                self.current
            }
            None => None,
        };
        Ok(EmaResult {
            timestamp: item.timestamp(),
            ema,
        })
    }

    fn warmup(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.current = None;
        self.count = 0;
        self.seed_sum = Decimal::ZERO;
    }
}

impl Timestamped for EmaResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Chainable for EmaResult {
    fn chain_value(&self) -> Option<Decimal> {
        self.ema
    }
}

/// Streaming form: an EMA hub chained onto `upstream`.
pub fn ema_hub<U, I>(
    upstream: &Rc<RefCell<U>>,
    period: usize,
) -> Result<Rc<RefCell<StreamHub<Ema<I>>>>, StreamError>
where
    U: ChainSource<I> + 'static,
    I: Chainable + Clone + 'static,
{
    StreamHub::attach(upstream, Ema::new(period))
}

/// Series form: one-shot EMA over a sorted history.
pub fn ema_series<I: Chainable + Clone>(
    items: &[I],
    period: usize,
) -> Result<Vec<EmaResult>, StreamError> {
    transform(Ema::new(period), items)
}

pub fn ema_series_strict<I: Chainable + Clone>(
    items: &[I],
    period: usize,
) -> Result<Vec<EmaResult>, StreamError> {
    transform_strict(Ema::new(period), items)
}

/// Buffer form: an incrementally-appendable EMA list.
pub fn ema_buffer<I: Chainable + Clone>(period: usize) -> BufferList<Ema<I>> {
    BufferList::new(Ema::new(period))
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
    fn test_ema_seed() {
        let items = vec![point(1, dec!(2)), point(2, dec!(4)), point(3, dec!(6))];
        let out = ema_series(&items, 3).unwrap();
        assert_eq!(out[0].ema, None);
        assert_eq!(out[1].ema, None);
        // third value seeds with SMA = (2+4+6)/3 = 4
        assert_eq!(out[2].ema, Some(dec!(4)));
    }

    #[test]
    fn test_ema_midstream_gap_yields_none() {
        let gap = PricePoint::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 4, 0).unwrap(), None);
        let items = vec![
            point(1, dec!(2)),
            point(2, dec!(4)),
            point(3, dec!(6)), // seed = 4
            gap,
            point(5, dec!(8)),
        ];
        let out = ema_series(&items, 3).unwrap();
        // an undefined input yields an undefined output, not a re-emit
        assert_eq!(out[3].ema, None);
        // and leaves the smoothing state untouched: (8 - 4) * 0.5 + 4 = 6
        assert_eq!(out[4].ema, Some(dec!(6)));
    }

    #[test]
    fn test_ema_after_seed() {
        let items = vec![
            point(1, dec!(2)),
            point(2, dec!(4)),
            point(3, dec!(6)),
            point(4, dec!(8)),
        ];
        let out = ema_series(&items, 3).unwrap();
        // EMA = (8 - 4) * 0.5 + 4 = 6
        assert_eq!(out[3].ema, Some(dec!(6)));
    }
}
