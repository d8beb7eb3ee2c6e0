use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::traits::{Chainable, Timestamped};

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Quote {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl Timestamped for Quote {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Chainable for Quote {
    fn chain_value(&self) -> Option<Decimal> {
        Some(self.close)
    }
}

// ---------------------------------------------------------------------------
// Generic chain record
// ---------------------------------------------------------------------------

/// A timestamped single value — the generic record for value-only
/// streams and for feeding derived series back into the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<Decimal>,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, value: Option<Decimal>) -> Self {
        Self { timestamp, value }
    }

    /// A point with a defined value.
    pub fn some(timestamp: DateTime<Utc>, value: Decimal) -> Self {
        Self {
            timestamp,
            value: Some(value),
        }
    }
}

impl Timestamped for PricePoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Chainable for PricePoint {
    fn chain_value(&self) -> Option<Decimal> {
        self.value
    }
}
