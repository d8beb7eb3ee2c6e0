use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

use streamta_core::{Chainable, StreamError, Timestamped};
use streamta_engine::{ChainSource, PairHub, PairState};

/// Rolling Pearson correlation over the last `period` matched pairs.
///
/// Maintains running sums over a fixed-size window of paired values, so
/// each matched step is O(1). Primary items without a defined pairing
/// (no secondary value at the same timestamp yet, or either side still
/// warming up) leave the window untouched and produce `None`; the
/// position is re-derived when the pairing completes. `None` is also
/// produced while either side of the window has zero variance.
#[derive(Debug, Clone)]
pub struct Correlation<I> {
    len: usize,
    window: VecDeque<(Decimal, Decimal)>,
    sum_a: Decimal,
    sum_b: Decimal,
    sum_ab: Decimal,
    sum_aa: Decimal,
    sum_bb: Decimal,
    _input: PhantomData<I>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrResult {
    pub timestamp: DateTime<Utc>,
    pub corr: Option<Decimal>,
}

impl<I> Correlation<I> {
    pub fn new(period: usize) -> Self {
        assert!(period > 1, "correlation period must be > 1");
        Self {
            len: period,
            window: VecDeque::with_capacity(period),
            sum_a: Decimal::ZERO,
            sum_b: Decimal::ZERO,
            sum_ab: Decimal::ZERO,
            sum_aa: Decimal::ZERO,
            sum_bb: Decimal::ZERO,
            _input: PhantomData,
        }
    }

    fn push(&mut self, a: Decimal, b: Decimal) {
        self.window.push_back((a, b));
        self.sum_a += a;
        self.sum_b += b;
        self.sum_ab += a * b;
        self.sum_aa += a * a;
        self.sum_bb += b * b;
        if self.window.len() > self.len {
            if let Some((a, b)) = self.window.pop_front() {
                self.sum_a -= a;
                self.sum_b -= b;
                self.sum_ab -= a * b;
                self.sum_aa -= a * a;
                self.sum_bb -= b * b;
            }
        }
    }

    fn value(&self) -> Option<Decimal> {
        if self.window.len() < self.len {
            return None;
        }
        let n = Decimal::from(self.len);
        let cov = self.sum_ab - self.sum_a * self.sum_b / n;
        let var_a = self.sum_aa - self.sum_a * self.sum_a / n;
        let var_b = self.sum_bb - self.sum_b * self.sum_b / n;
        if var_a <= Decimal::ZERO || var_b <= Decimal::ZERO {
            return None;
        }
        let denom = (var_a * var_b).sqrt()?;
        if denom.is_zero() {
            None
        } else {
            Some(cov / denom)
        }
    }
}

impl<I: Chainable + Clone> PairState for Correlation<I> {
    type In = I;
    type Out = CorrResult;

    fn apply(&mut self, primary: &I, paired: Option<&I>) -> Result<CorrResult, StreamError> {
        let corr = match (primary.chain_value(), paired.and_then(|p| p.chain_value())) {
            (Some(a), Some(b)) => {
                self.push(a, b);
                self.value()
            }
            _ => None,
        };
        Ok(CorrResult {
            timestamp: primary.timestamp(),
            corr,
        })
    }

    fn warmup(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum_a = Decimal::ZERO;
        self.sum_b = Decimal::ZERO;
        self.sum_ab = Decimal::ZERO;
        self.sum_aa = Decimal::ZERO;
        self.sum_bb = Decimal::ZERO;
    }
}

impl Timestamped for CorrResult {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Chainable for CorrResult {
    fn chain_value(&self) -> Option<Decimal> {
        self.corr
    }
}

/// Streaming form: a correlation hub over a primary and a secondary
/// provider, output aligned to the primary's timestamps.
pub fn corr_hub<U, V, I>(
    primary: &Rc<RefCell<U>>,
    secondary: &Rc<RefCell<V>>,
    period: usize,
) -> Result<Rc<RefCell<PairHub<Correlation<I>>>>, StreamError>
where
    U: ChainSource<I> + 'static,
    V: ChainSource<I> + 'static,
    I: Chainable + Clone + 'static,
{
    PairHub::attach(primary, secondary, Correlation::new(period))
}

/// Series form: one-shot correlation over two sorted histories, paired
/// by exact timestamp with binary search over the secondary.
pub fn corr_series<I: Chainable + Clone>(
    primary: &[I],
    secondary: &[I],
    period: usize,
) -> Result<Vec<CorrResult>, StreamError> {
    let mut state = Correlation::new(period);
    let mut out = Vec::with_capacity(primary.len());
    let mut last = None;
    for item in primary {
        let ts = item.timestamp();
        if let Some(prev) = last {
            if ts <= prev {
                return Err(StreamError::OutOfOrder {
                    timestamp: ts,
                    last: prev,
                });
            }
        }
        last = Some(ts);
        let paired = secondary
            .binary_search_by_key(&ts, |s| s.timestamp())
            .ok()
            .and_then(|i| secondary.get(i));
        out.push(state.apply(item, paired)?);
    }
    Ok(out)
}

/// Series form that fails with [`StreamError::InsufficientHistory`] when
/// the primary history is shorter than `period`.
pub fn corr_series_strict<I: Chainable + Clone>(
    primary: &[I],
    secondary: &[I],
    period: usize,
) -> Result<Vec<CorrResult>, StreamError> {
    if primary.len() < period {
        return Err(StreamError::InsufficientHistory {
            needed: period,
            have: primary.len(),
        });
    }
    corr_series(primary, secondary, period)
}
