//! Shared fixtures for engine unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use streamta_core::{PricePoint, StreamError, Timestamped};

use crate::event::StreamEvent;
use crate::hub::HubState;
use crate::node::NodeId;
use crate::observer::StreamObserver;

pub fn ts(i: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, i, 0).unwrap()
}

pub fn point(i: u32, value: Decimal) -> PricePoint {
    PricePoint::some(ts(i), value)
}

// ---------------------------------------------------------------------------
// Recording observer
// ---------------------------------------------------------------------------

pub type EventLog = Rc<RefCell<Vec<(NodeId, StreamEvent)>>>;

/// Passive subscriber that records every event it receives.
pub struct Recorder {
    id: NodeId,
    log: EventLog,
    pub ended: bool,
}

pub fn recorder() -> (Rc<RefCell<Recorder>>, EventLog) {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    (recorder_with_log(&log).0, log)
}

pub fn recorder_with_log(log: &EventLog) -> (Rc<RefCell<Recorder>>, EventLog) {
    let rec = Rc::new(RefCell::new(Recorder {
        id: NodeId::next(),
        log: log.clone(),
        ended: false,
    }));
    (rec, log.clone())
}

impl StreamObserver<PricePoint> for Recorder {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn on_event(&mut self, event: StreamEvent, _upstream: &[PricePoint]) -> Result<(), StreamError> {
        self.log.borrow_mut().push((self.id, event));
        Ok(())
    }

    fn on_end(&mut self) {
        self.ended = true;
    }

    fn reaches(&self, _target: NodeId) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Test hub states
// ---------------------------------------------------------------------------

/// Cumulative sum of chain values; order-sensitive, so corrections that
/// are mishandled show up immediately in the tail.
#[derive(Debug, Clone)]
pub struct RunningTotal {
    total: Decimal,
}

impl RunningTotal {
    pub fn new() -> Self {
        Self {
            total: Decimal::ZERO,
        }
    }
}

impl HubState for RunningTotal {
    type In = PricePoint;
    type Out = PricePoint;

    fn apply(&mut self, item: &PricePoint) -> Result<PricePoint, StreamError> {
        if let Some(v) = item.value {
            self.total += v;
        }
        Ok(PricePoint::some(item.timestamp(), self.total))
    }

    fn warmup(&self) -> usize {
        1
    }

    fn reset(&mut self) {
        self.total = Decimal::ZERO;
    }
}

/// Passthrough that faults on a marker value, for exercising the
/// all-or-nothing rollback contract.
#[derive(Debug, Clone)]
pub struct FailOnThirteen;

impl HubState for FailOnThirteen {
    type In = PricePoint;
    type Out = PricePoint;

    fn apply(&mut self, item: &PricePoint) -> Result<PricePoint, StreamError> {
        if item.value == Some(dec!(13)) {
            return Err(StreamError::Fault("unlucky value".into()));
        }
        Ok(item.clone())
    }

    fn warmup(&self) -> usize {
        1
    }

    fn reset(&mut self) {}
}
