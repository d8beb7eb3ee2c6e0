use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use tracing::debug;

use streamta_core::{StreamError, TimeSeries, Timestamped};

use crate::event::StreamEvent;
use crate::node::{HubPhase, NodeId};
use crate::observer::{
    SharedObserver, StreamObserver, SubscriberRegistry, UpstreamHandle,
};
use crate::publisher::{ChainSource, Publisher};

// ---------------------------------------------------------------------------
// Dual-input formula contract
// ---------------------------------------------------------------------------

/// Per-step transform over two input streams aligned by timestamp.
///
/// The primary stream drives output: one output record per primary item,
/// carrying the primary timestamp. `paired` is the secondary item with
/// the exact same timestamp, or `None` while the secondary side has not
/// produced one yet; implementations emit a `None`-valued record in that
/// case and the pairing is re-evaluated when the secondary catches up.
pub trait PairState: Clone {
    type In: Timestamped + Clone;
    type Out: Timestamped + Clone;

    fn apply(
        &mut self,
        primary: &Self::In,
        paired: Option<&Self::In>,
    ) -> Result<Self::Out, StreamError>;

    /// Minimum number of matched pairs before the first defined output.
    fn warmup(&self) -> usize;

    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Pair hub
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum PairSide {
    Primary,
    Secondary,
}

/// A transform node fed by two upstream providers.
///
/// Each side is observed through a private tap registered under its own
/// node id; the hub mirrors both input series and re-derives output on
/// whichever side changes. Only a primary append past the end of the
/// output is incremental; every other change rebuilds from the affected
/// timestamp, since a late secondary item can retroactively complete a
/// pairing that was previously deferred.
pub struct PairHub<S: PairState> {
    state: S,
    publisher: Publisher<S::Out>,
    primary: TimeSeries<S::In>,
    secondary: TimeSeries<S::In>,
    primary_link: Option<SideLink<S>>,
    secondary_link: Option<SideLink<S>>,
}

struct SideLink<S: PairState> {
    tap_id: NodeId,
    upstream: UpstreamHandle,
    // keeps the tap alive; the upstream registry only holds a weak handle
    _tap: Rc<RefCell<PairTap<S>>>,
}

struct PairTap<S: PairState> {
    id: NodeId,
    hub_id: NodeId,
    side: PairSide,
    hub: Weak<RefCell<PairHub<S>>>,
}

impl<S: PairState + 'static> StreamObserver<S::In> for PairTap<S> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn on_event(&mut self, event: StreamEvent, upstream: &[S::In]) -> Result<(), StreamError> {
        match self.hub.upgrade() {
            Some(hub) => hub.borrow_mut().on_side_event(self.side, event, upstream),
            None => Ok(()),
        }
    }

    fn on_end(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut hub = hub.borrow_mut();
            match self.side {
                PairSide::Primary => hub.primary_link = None,
                PairSide::Secondary => hub.secondary_link = None,
            }
        }
    }

    fn reaches(&self, target: NodeId) -> bool {
        // the owning hub's id is checked before borrowing it, since the
        // target node is mutably borrowed during a cycle check
        if self.hub_id == target {
            return true;
        }
        match self.hub.upgrade() {
            Some(hub) => hub.borrow().publisher.reaches(target),
            None => false,
        }
    }
}

impl<S: PairState + 'static> PairHub<S> {
    /// Creates a pair hub over a primary and a secondary provider and
    /// catches up on both existing histories, primary first. The cache
    /// bound is inherited from the primary side.
    pub fn attach<U, V>(
        primary: &Rc<RefCell<U>>,
        secondary: &Rc<RefCell<V>>,
        state: S,
    ) -> Result<Rc<RefCell<Self>>, StreamError>
    where
        U: ChainSource<S::In> + 'static,
        V: ChainSource<S::In> + 'static,
    {
        let hub = Rc::new(RefCell::new(Self {
            state,
            publisher: Publisher::new(),
            primary: TimeSeries::new(),
            secondary: TimeSeries::new(),
            primary_link: None,
            secondary_link: None,
        }));
        let bound = primary.borrow().publisher().max_cache();
        hub.borrow_mut().publisher.set_max_cache(bound);

        let primary_link = Self::tap_into(&hub, primary, PairSide::Primary)?;
        hub.borrow_mut().primary_link = Some(primary_link);
        let secondary_link = Self::tap_into(&hub, secondary, PairSide::Secondary)?;
        hub.borrow_mut().secondary_link = Some(secondary_link);
        Ok(hub)
    }

    fn tap_into<U>(
        hub: &Rc<RefCell<Self>>,
        upstream: &Rc<RefCell<U>>,
        side: PairSide,
    ) -> Result<SideLink<S>, StreamError>
    where
        U: ChainSource<S::In> + 'static,
    {
        let tap = Rc::new(RefCell::new(PairTap {
            id: NodeId::next(),
            hub_id: hub.borrow().publisher.id(),
            side,
            hub: Rc::downgrade(hub),
        }));
        let tap_id = tap.borrow().id;
        let observer: SharedObserver<S::In> = tap.clone();
        upstream.borrow_mut().publisher_mut().subscribe(&observer)?;
        let registry: Rc<RefCell<dyn SubscriberRegistry>> = upstream.clone();
        Ok(SideLink {
            tap_id,
            upstream: Rc::downgrade(&registry),
            _tap: tap,
        })
    }

    /// Detaches both taps. The output cache and downstream subscribers
    /// remain intact. Idempotent.
    pub fn unsubscribe(&mut self) {
        for link in [self.primary_link.take(), self.secondary_link.take()]
            .into_iter()
            .flatten()
        {
            if let Some(upstream) = link.upstream.upgrade() {
                upstream.borrow_mut().unsubscribe_node(link.tap_id);
            }
        }
    }

    pub fn end_transmission(&mut self) {
        self.publisher.end_transmission();
    }

    pub fn node_id(&self) -> NodeId {
        self.publisher.id()
    }

    /// `Streaming` while at least one side is still attached.
    pub fn phase(&self) -> HubPhase {
        if self.primary_link.is_some() || self.secondary_link.is_some() {
            HubPhase::Streaming
        } else {
            HubPhase::Detached
        }
    }

    pub fn results(&self) -> &[S::Out] {
        self.publisher.series().as_slice()
    }

    pub fn latest(&self) -> Option<&S::Out> {
        self.publisher.series().last()
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    fn on_side_event(
        &mut self,
        side: PairSide,
        event: StreamEvent,
        upstream: &[S::In],
    ) -> Result<(), StreamError> {
        let index = event.position().min(upstream.len());
        let mirror = match side {
            PairSide::Primary => &mut self.primary,
            PairSide::Secondary => &mut self.secondary,
        };
        let invalidated = Self::resync_mirror(mirror, upstream, index)?;

        // primary append past the end of the output is the only
        // incremental case
        if let (PairSide::Primary, StreamEvent::Added(_)) = (side, event) {
            let past_end = match (self.primary.last(), self.publisher.series().last()) {
                (Some(item), Some(out)) => item.timestamp() > out.timestamp(),
                (Some(_), None) => true,
                (None, _) => return Ok(()),
            };
            if past_end {
                return self.apply_latest();
            }
        }

        match invalidated {
            Some(ts) => self.rebuild_from(ts),
            None => Ok(()),
        }
    }

    /// Brings a mirror in line with the upstream snapshot and returns
    /// the earliest timestamp whose derived output may now be stale:
    /// the first replaced mirror entry or the first incoming item,
    /// whichever is older. `None` means the mirror was unchanged.
    fn resync_mirror(
        mirror: &mut TimeSeries<S::In>,
        upstream: &[S::In],
        index: usize,
    ) -> Result<Option<DateTime<Utc>>, StreamError> {
        let from = match upstream.get(index) {
            Some(item) => mirror.lower_bound(item.timestamp()),
            None => match upstream.last() {
                Some(last) => mirror.upper_bound(last.timestamp()),
                None => 0,
            },
        };
        let replaced = mirror.get(from).map(Timestamped::timestamp);
        let incoming = upstream.get(index).map(Timestamped::timestamp);
        let invalidated = match (replaced, incoming) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        mirror.truncate_from(from);
        for item in &upstream[index..] {
            mirror.append(item.clone())?;
        }
        Ok(invalidated)
    }

    /// Applies the newest primary item only.
    fn apply_latest(&mut self) -> Result<(), StreamError> {
        let Some(item) = self.primary.last().cloned() else {
            return Ok(());
        };
        let paired = self.secondary.index_of(item.timestamp());
        let snapshot = self.state.clone();
        let result = self
            .state
            .apply(&item, paired.and_then(|i| self.secondary.get(i)))
            .and_then(|out| self.publisher.series_mut().append(out));
        let out_index = match result {
            Ok(i) => i,
            Err(e) => {
                self.state = snapshot;
                return Err(e);
            }
        };
        if let Err(e) = self.publisher.notify(StreamEvent::Added(out_index)) {
            self.publisher.series_mut().truncate_from(out_index);
            self.state = snapshot;
            return Err(e);
        }
        self.prune();
        Ok(())
    }

    /// Re-derives output for every primary item at or after `from_ts`,
    /// replaying the earlier prefix to reconstruct state first.
    fn rebuild_from(&mut self, from_ts: DateTime<Utc>) -> Result<(), StreamError> {
        let primary_from = self.primary.lower_bound(from_ts);
        let own_from = self.publisher.series().lower_bound(from_ts);
        if primary_from >= self.primary.len() && own_from >= self.publisher.series().len() {
            // no output position is affected (e.g. a secondary item with
            // no primary counterpart yet)
            return Ok(());
        }

        let state_snapshot = self.state.clone();
        let saved_tail = self.publisher.series_mut().truncate_from(own_from);

        match self.replay(primary_from, own_from) {
            Ok(()) => {
                self.prune();
                Ok(())
            }
            Err(e) => {
                self.state = state_snapshot;
                self.publisher.series_mut().truncate_from(own_from);
                self.publisher.series_mut().restore_tail(saved_tail);
                self.publisher.resync(own_from);
                Err(e)
            }
        }
    }

    fn replay(&mut self, primary_from: usize, own_from: usize) -> Result<(), StreamError> {
        self.state.reset();
        for index in 0..self.primary.len() {
            let Some(item) = self.primary.get(index).cloned() else {
                break;
            };
            let paired_at = self.secondary.index_of(item.timestamp());
            let out = self
                .state
                .apply(&item, paired_at.and_then(|i| self.secondary.get(i)))?;
            if index >= primary_from {
                self.publisher.series_mut().append(out)?;
            }
        }
        debug!(
            from = own_from,
            replayed = self.primary.len().saturating_sub(primary_from),
            "rebuilt pair hub cache"
        );
        self.publisher.notify(StreamEvent::Rebuild(own_from))
    }

    fn prune(&mut self) {
        self.publisher.prune();
        if let Some(max) = self.publisher.max_cache() {
            for mirror in [&mut self.primary, &mut self.secondary] {
                if mirror.len() > max {
                    let excess = mirror.len() - max;
                    mirror.evict_front(excess);
                }
            }
        }
    }
}

impl<S: PairState + 'static> SubscriberRegistry for PairHub<S> {
    fn unsubscribe_node(&mut self, id: NodeId) -> bool {
        self.publisher.unsubscribe(id)
    }
}

impl<S: PairState + 'static> ChainSource<S::Out> for PairHub<S> {
    fn publisher(&self) -> &Publisher<S::Out> {
        &self.publisher
    }

    fn publisher_mut(&mut self) -> &mut Publisher<S::Out> {
        &mut self.publisher
    }
}
