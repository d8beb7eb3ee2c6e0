use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use streamta_core::{StreamError, Timestamped};

use crate::event::StreamEvent;
use crate::node::{HubPhase, NodeId};
use crate::observer::{
    SharedObserver, StreamObserver, SubscriberRegistry, UpstreamHandle,
};
use crate::publisher::{ChainSource, Publisher};

// ---------------------------------------------------------------------------
// Formula plug-in contract
// ---------------------------------------------------------------------------

/// The pure, per-step transform a hub runs: state × input → output.
///
/// Implementations keep only the minimal sufficient statistics needed to
/// produce the next output — a fixed-size ring, running sums, the last
/// smoothed value. State is a derived, reconstructible projection of the
/// upstream prefix: after `reset`, replaying the prefix through `apply`
/// must land in exactly the same state. `Clone` must be cheap; it is the
/// snapshot used for atomic rollback.
pub trait HubState: Clone {
    type In: Timestamped + Clone;
    type Out: Timestamped + Clone;

    /// Consumes the next input and produces the output for its position.
    /// Warm-up positions produce records with a `None` value, not errors.
    fn apply(&mut self, item: &Self::In) -> Result<Self::Out, StreamError>;

    /// Minimum number of inputs before the first defined output.
    fn warmup(&self) -> usize;

    /// Returns to the initial (empty-history) state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Stream hub
// ---------------------------------------------------------------------------

/// An incremental transform node: subscribes to one upstream provider,
/// is itself a provider, and converts each upstream event into one
/// downstream event using O(1)–O(window) state.
///
/// The hot path (`Added`) extends the output by one element. A
/// correction or late arrival invalidates everything from its position
/// forward; the hub then resets its state, replays the corrected
/// upstream prefix to reconstruct where it stood, re-derives the tail,
/// and notifies its own subscribers so the invalidation cascades through
/// arbitrarily deep chains. Rebuild cost is O(remaining length), the
/// documented price of a correction landing early in a long series.
pub struct StreamHub<S: HubState> {
    state: S,
    publisher: Publisher<S::Out>,
    upstream: Option<UpstreamHandle>,
    phase: HubPhase,
}

impl<S: HubState + 'static> StreamHub<S> {
    /// Creates a hub bound to an upstream provider and catches it up on
    /// the provider's existing history. The hub inherits the upstream's
    /// cache bound.
    pub fn attach<U>(upstream: &Rc<RefCell<U>>, state: S) -> Result<Rc<RefCell<Self>>, StreamError>
    where
        U: ChainSource<S::In> + 'static,
    {
        let hub = Rc::new(RefCell::new(Self {
            state,
            publisher: Publisher::new(),
            upstream: None,
            phase: HubPhase::Detached,
        }));
        Self::bind(&hub, upstream)?;
        Ok(hub)
    }

    /// Re-attaches a detached hub (or moves a streaming one) to a new
    /// upstream, rebuilding from the new provider's history. A
    /// resubscription that would close a cycle is refused up front,
    /// leaving any existing upstream edge intact.
    pub fn resubscribe<U>(
        hub: &Rc<RefCell<Self>>,
        upstream: &Rc<RefCell<U>>,
    ) -> Result<(), StreamError>
    where
        U: ChainSource<S::In> + 'static,
    {
        let upstream_id = upstream.borrow().publisher().id();
        {
            let this = hub.borrow();
            if upstream_id == this.node_id() || this.publisher.reaches(upstream_id) {
                return Err(StreamError::CycleDetected);
            }
        }
        hub.borrow_mut().unsubscribe();
        Self::bind(hub, upstream)
    }

    fn bind<U>(hub: &Rc<RefCell<Self>>, upstream: &Rc<RefCell<U>>) -> Result<(), StreamError>
    where
        U: ChainSource<S::In> + 'static,
    {
        // self-subscription would alias the two borrows below, so it is
        // refused before either side is held mutably
        let hub_id = hub.borrow().node_id();
        let bound = {
            let up = upstream.borrow();
            if up.publisher().id() == hub_id {
                return Err(StreamError::CycleDetected);
            }
            up.publisher().max_cache()
        };
        hub.borrow_mut().publisher.set_max_cache(bound);
        let observer: SharedObserver<S::In> = hub.clone();
        upstream.borrow_mut().publisher_mut().subscribe(&observer)?;
        let registry: Rc<RefCell<dyn SubscriberRegistry>> = upstream.clone();
        let mut this = hub.borrow_mut();
        this.upstream = Some(Rc::downgrade(&registry));
        this.phase = HubPhase::Streaming;
        Ok(())
    }

    /// Detaches from the upstream provider. The hub's own cache and
    /// subscribers remain intact and keep operating on now-stale output.
    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.upstream.take() {
            if let Some(upstream) = handle.upgrade() {
                upstream.borrow_mut().unsubscribe_node(self.publisher.id());
            }
        }
        self.phase = HubPhase::Detached;
    }

    /// Ends this hub's own transmission: unsubscribes all of its
    /// subscribers and refuses further output.
    pub fn end_transmission(&mut self) {
        self.publisher.end_transmission();
    }

    pub fn node_id(&self) -> NodeId {
        self.publisher.id()
    }

    pub fn phase(&self) -> HubPhase {
        self.phase
    }

    /// The computed output series.
    pub fn results(&self) -> &[S::Out] {
        self.publisher.series().as_slice()
    }

    pub fn latest(&self) -> Option<&S::Out> {
        self.publisher.series().last()
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    /// Hot path: one upstream append becomes one output append.
    fn apply_add(&mut self, upstream: &[S::In], index: usize) -> Result<(), StreamError> {
        let Some(item) = upstream.get(index) else {
            return Ok(());
        };
        let snapshot = self.state.clone();
        let out = match self.state.apply(item) {
            Ok(out) => out,
            Err(e) => {
                self.state = snapshot;
                return Err(e);
            }
        };
        let out_index = match self.publisher.series_mut().append(out) {
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
        self.publisher.prune();
        Ok(())
    }

    /// Rebuild protocol: state is a running aggregate, so a change at
    /// `index` invalidates everything from there forward. Reconstructs
    /// pre-`index` state by replaying the corrected prefix, re-derives
    /// the tail, then cascades a single rebuild notification downstream.
    fn rebuild_from(&mut self, upstream: &[S::In], index: usize) -> Result<(), StreamError> {
        let index = index.min(upstream.len());
        let own_from = self.stale_from(upstream, index);

        let state_snapshot = self.state.clone();
        let saved_tail = self.publisher.series_mut().truncate_from(own_from);

        match self.replay(upstream, index, own_from) {
            Ok(()) => {
                self.publisher.prune();
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

    fn replay(
        &mut self,
        upstream: &[S::In],
        index: usize,
        own_from: usize,
    ) -> Result<(), StreamError> {
        self.state.reset();
        for item in &upstream[..index] {
            self.state.apply(item)?;
        }
        for item in &upstream[index..] {
            let out = self.state.apply(item)?;
            self.publisher.series_mut().append(out)?;
        }
        debug!(
            from = own_from,
            replayed = upstream.len() - index,
            "rebuilt hub cache"
        );
        self.publisher.notify(StreamEvent::Rebuild(own_from))
    }

    /// First position of this hub's own cache invalidated by an upstream
    /// change at `index`. Keyed by timestamp rather than raw position so
    /// it stays correct when the two caches are offset by eviction.
    fn stale_from(&self, upstream: &[S::In], index: usize) -> usize {
        if let Some(item) = upstream.get(index) {
            self.publisher.series().lower_bound(item.timestamp())
        } else {
            match upstream.last() {
                Some(last) => self.publisher.series().upper_bound(last.timestamp()),
                None => 0,
            }
        }
    }
}

impl<S: HubState + 'static> StreamObserver<S::In> for StreamHub<S> {
    fn node_id(&self) -> NodeId {
        self.publisher.id()
    }

    fn on_event(&mut self, event: StreamEvent, upstream: &[S::In]) -> Result<(), StreamError> {
        match event {
            StreamEvent::Added(index) => self.apply_add(upstream, index),
            StreamEvent::Overwritten(index)
            | StreamEvent::Inserted(index)
            | StreamEvent::Rebuild(index) => self.rebuild_from(upstream, index),
        }
    }

    fn on_end(&mut self) {
        self.upstream = None;
        self.phase = HubPhase::Detached;
    }

    fn reaches(&self, target: NodeId) -> bool {
        self.publisher.reaches(target)
    }
}

impl<S: HubState + 'static> SubscriberRegistry for StreamHub<S> {
    fn unsubscribe_node(&mut self, id: NodeId) -> bool {
        self.publisher.unsubscribe(id)
    }
}

impl<S: HubState + 'static> ChainSource<S::Out> for StreamHub<S> {
    fn publisher(&self) -> &Publisher<S::Out> {
        &self.publisher
    }

    fn publisher_mut(&mut self) -> &mut Publisher<S::Out> {
        &mut self.publisher
    }
}
