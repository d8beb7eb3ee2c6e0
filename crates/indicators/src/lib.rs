//! Indicator formula plug-ins for the streamta engine.
//!
//! Each indicator is a pure incremental state machine implementing
//! [`HubState`](streamta_engine::HubState) (or
//! [`PairState`](streamta_engine::PairState) for dual-series formulas),
//! usable in three forms: chained into a live subscription graph
//! (`*_hub`), one-shot over a complete history (`*_series`), or as an
//! incrementally-appendable list (`*_buffer`).

pub mod correlation;
pub mod ema;
pub mod rsi;
pub mod sma;

pub use correlation::{
    corr_hub, corr_series, corr_series_strict, CorrResult, Correlation,
};
pub use ema::{ema_buffer, ema_hub, ema_series, ema_series_strict, Ema, EmaResult};
pub use rsi::{rsi_buffer, rsi_hub, rsi_series, rsi_series_strict, Rsi, RsiResult};
pub use sma::{sma_buffer, sma_hub, sma_series, sma_series_strict, Sma, SmaResult};
