use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Item traits
// ---------------------------------------------------------------------------

/// Any value with a unique, totally-ordered timestamp.
///
/// Quotes and every indicator result record implement this. Items are
/// immutable once constructed; a correction replaces the record at a
/// timestamp rather than mutating it in place.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// A timestamped item that exposes a single primary value, so that any
/// node's output can feed the next node in a chain.
///
/// Quotes expose their close price; indicator results expose their main
/// field. `None` means the value is not yet available (warm-up, or a
/// deferred dual-series pairing).
pub trait Chainable: Timestamped {
    fn chain_value(&self) -> Option<Decimal>;
}
