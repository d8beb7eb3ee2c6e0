use streamta_core::{StreamError, Timestamped};

use crate::hub::HubState;

/// One-shot transform over a complete history.
///
/// Equivalent to streaming the same items through a hub in order, which
/// is what makes batch output the reference for the incremental paths.
/// Input must be sorted by timestamp with no duplicates.
pub fn transform<S: HubState>(mut state: S, items: &[S::In]) -> Result<Vec<S::Out>, StreamError> {
    let mut out = Vec::with_capacity(items.len());
    let mut last = None;
    for item in items {
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
        out.push(state.apply(item)?);
    }
    Ok(out)
}

/// Like [`transform`], but refuses input shorter than the formula's
/// warm-up, for callers that treat an all-`None` result as a bug.
pub fn transform_strict<S: HubState>(state: S, items: &[S::In]) -> Result<Vec<S::Out>, StreamError> {
    let needed = state.warmup();
    if items.len() < needed {
        return Err(StreamError::InsufficientHistory {
            needed,
            have: items.len(),
        });
    }
    transform(state, items)
}
