use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use streamta_core::{Chainable, StreamError, Timestamped};
use streamta_engine::{
    transform, transform_strict, BufferList, ChainSource, HubState, StreamHub,
};

/// Relative Strength Index (RSI) with Wilder's smoothing for average
/// gain/loss. Pegs at 100 while the average loss is zero.
#[derive(Debug, Clone)]
pub struct Rsi<I> {
    len: usize,
    prev_value: Option<Decimal>,
    gains: VecDeque<Decimal>,
    losses: VecDeque<Decimal>,
    avg_gain: Option<Decimal>,
    avg_loss: Option<Decimal>,
    count: usize,
    _input: PhantomData<I>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsiResult {
    pub timestamp: DateTime<Utc>,
    pub rsi: Option<Decimal>,
}

impl<I> Rsi<I> {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "RSI period must be > 0");
        Self {
            len: period,
            prev_value: None,
            gains: VecDeque::with_capacity(period),
            losses: VecDeque::with_capacity(period),
            avg_gain: None,
            avg_loss: None,
            count: 0,
            _input: PhantomData,
        }
    }

    fn value(&self) -> Option<Decimal> {
        match (self.avg_gain, self.avg_loss) {
            (Some(ag), Some(al)) => {
                if al.is_zero() {
                    Some(dec!(100))
                } else {
                    let rs = ag / al;
                    Some(dec!(100) - (dec!(100) / (Decimal::ONE + rs)))
                }
            }
            _ => None,
        }
    }
}

impl<I: Chainable + Clone> HubState for Rsi<I> {
    type In = I;
    type Out = RsiResult;

    fn apply(&mut self, item: &I) -> Result<RsiResult, StreamError> {
        let mut rsi = None;
        if let Some(value) = item.chain_value() {
            if let Some(prev) = self.prev_value {
                let change = value - prev;
                let gain = change.max(Decimal::ZERO);
                let loss = (-change).max(Decimal::ZERO);
                self.count += 1;

                match (self.avg_gain, self.avg_loss) {
                    (Some(prev_ag), Some(prev_al)) => {
                        // Wilder's smoothing
                        let period = Decimal::from(self.len);
                        self.avg_gain = Some((prev_ag * (period - Decimal::ONE) + gain) / period);
                        self.avg_loss = Some((prev_al * (period - Decimal::ONE) + loss) / period);
                    }
                    _ => {
                        self.gains.push_back(gain);
                        self.losses.push_back(loss);
                        if self.count >= self.len {
                            let period = Decimal::from(self.len);
                            self.avg_gain = Some(self.gains.iter().sum::<Decimal>() / period);
                            self.avg_loss = Some(self.losses.iter().sum::<Decimal>() / period);
                        }
                    }
                }
            }
            self.prev_value = Some(value);
            rsi = self.value();
        }
        Ok(RsiResult {
            timestamp: item.timestamp(),
            rsi,
        })
    }

    fn warmup(&self) -> usize {
        // one extra data point for the first change
        self.len + 1
    }

    fn reset(&mut self) {
        self.prev_value = None;
        self.gains.clear();
        self.losses.clear();
        self.avg_gain = None;
        self.avg_loss = None;
        self.count = 0;
    }
}

impl Timestamped for RsiResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Chainable for RsiResult {
    fn chain_value(&self) -> Option<Decimal> {
        self.rsi
    }
}

/// Streaming form: an RSI hub chained onto `upstream`.
pub fn rsi_hub<U, I>(
    upstream: &Rc<RefCell<U>>,
    period: usize,
) -> Result<Rc<RefCell<StreamHub<Rsi<I>>>>, StreamError>
where
    U: ChainSource<I> + 'static,
    I: Chainable + Clone + 'static,
{
    StreamHub::attach(upstream, Rsi::new(period))
}

/// Series form: one-shot RSI over a sorted history.
pub fn rsi_series<I: Chainable + Clone>(
    items: &[I],
    period: usize,
) -> Result<Vec<RsiResult>, StreamError> {
    transform(Rsi::new(period), items)
}

pub fn rsi_series_strict<I: Chainable + Clone>(
    items: &[I],
    period: usize,
) -> Result<Vec<RsiResult>, StreamError> {
    transform_strict(Rsi::new(period), items)
}

/// Buffer form: an incrementally-appendable RSI list.
pub fn rsi_buffer<I: Chainable + Clone>(period: usize) -> BufferList<Rsi<I>> {
    BufferList::new(Rsi::new(period))
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
    fn test_rsi_basic() {
        let values = [
            dec!(44), dec!(44.34), dec!(44.09), dec!(43.61), dec!(44.33),
            dec!(44.83), dec!(45.10), dec!(45.42), dec!(45.84), dec!(46.08),
            dec!(45.89), dec!(46.03), dec!(45.61), dec!(46.28), dec!(46.28),
        ];
        let items: Vec<_> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| point(i as u32, v))
            .collect();
        let out = rsi_series(&items, 14).unwrap();
        // warm-up needs period + 1 data points
        assert_eq!(out[13].rsi, None);
        let rsi = out[14].rsi.unwrap();
        assert!(rsi > Decimal::ZERO && rsi < dec!(100));
    }

    #[test]
    fn test_rsi_midstream_gap_yields_none() {
        let gap = PricePoint::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap(), None);
        let mut items: Vec<_> = (0..4).map(|i| point(i, Decimal::from(i + 1))).collect();
        items.push(gap);
        items.push(point(11, dec!(5)));
        let out = rsi_series(&items, 3).unwrap();
        assert_eq!(out[3].rsi, Some(dec!(100)));
        // an undefined input yields an undefined output, not a re-emit
        assert_eq!(out[4].rsi, None);
        // and leaves the smoothing state untouched
        assert_eq!(out[5].rsi, Some(dec!(100)));
    }

    #[test]
    fn test_rsi_pegs_at_100_without_losses() {
        let items: Vec<_> = (0..4).map(|i| point(i, Decimal::from(i + 1))).collect();
        let out = rsi_series(&items, 3).unwrap();
        assert_eq!(out[3].rsi, Some(dec!(100)));
    }
}
