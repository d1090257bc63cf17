//! Per-type subscription aggregator.
//!
//! One `Mux` owns the single upstream subscription per resource type: it
//! holds one `WatchMap` per type URL, merges interest from every attached
//! subscription facade, and keeps the transport subscribed to exactly the
//! current interest union — no more, no less. Inbound transport responses
//! enter here and are delegated to the type's watch map for fan-out.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use tracing::{debug, info, trace, warn};

use crate::{
    AddedRemoved, ConfigUpdateFailureReason, InterestSet, RawResource, ResourceDecoder,
    ResourceName, SubscriptionCallbacks, SubscriptionTransport, UpdateBatch, UpdateError, WatchId,
    WatchMap,
};

/// Protocol state of one type's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// No facade has started the subscription yet.
    Uninitialized,
    /// Subscribed upstream; waiting for responses.
    Subscribed,
    /// A response is being decoded and fanned out right now.
    Updating,
    /// The last batch could not be decoded; awaiting a transport retry.
    Failed,
}

/// What was last communicated to the transport for a type.
#[derive(Debug, Clone, PartialEq)]
enum SentInterest {
    Interest(InterestSet),
    Cleared,
}

struct TypeEntry {
    watch_map: Rc<WatchMap>,
    state: Cell<MuxState>,
    pause_count: Cell<u32>,
    /// Interest changed while paused; flush once on resume-to-zero.
    pending_flush: Cell<bool>,
    last_sent: RefCell<Option<SentInterest>>,
}

impl TypeEntry {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            watch_map: Rc::new(WatchMap::new()),
            state: Cell::new(MuxState::Uninitialized),
            pause_count: Cell::new(0),
            pending_flush: Cell::new(false),
            last_sent: RefCell::new(None),
        })
    }
}

pub struct Mux {
    transport: Rc<dyn SubscriptionTransport>,
    types: RefCell<HashMap<String, Rc<TypeEntry>>>,
}

impl Mux {
    pub fn new(transport: Rc<dyn SubscriptionTransport>) -> Rc<Self> {
        Rc::new(Self {
            transport,
            types: RefCell::new(HashMap::new()),
        })
    }

    /// Registers a watch for `type_url`. The new watch starts wildcard;
    /// callers follow up with `update_watch` to narrow it.
    pub fn add_watch(
        &self,
        type_url: &str,
        callbacks: Rc<dyn SubscriptionCallbacks>,
        decoder: Rc<dyn ResourceDecoder>,
    ) -> WatchId {
        let entry = self.entry(type_url);
        let id = entry.watch_map.add_watch(callbacks, decoder);
        self.flush_interest(type_url, &entry);
        id
    }

    pub fn update_watch(
        &self,
        type_url: &str,
        id: WatchId,
        names: BTreeSet<ResourceName>,
    ) -> AddedRemoved {
        let entry = self.entry(type_url);
        let diff = entry.watch_map.update_watch_interest(id, names);
        if !diff.is_empty() {
            self.flush_interest(type_url, &entry);
        }
        diff
    }

    pub fn remove_watch(
        &self,
        type_url: &str,
        id: WatchId,
    ) {
        let entry = self.entry(type_url);
        entry.watch_map.remove_watch(id);
        self.flush_interest(type_url, &entry);
    }

    /// First `start()` from any attached facade activates the type's
    /// upstream subscription; later calls are no-ops (for aggregated
    /// subscriptions only the owning entity actually starts the type).
    pub fn start(
        &self,
        type_url: &str,
    ) {
        let entry = self.entry(type_url);
        if entry.state.get() != MuxState::Uninitialized {
            debug!(type_url, "subscription already started");
            return;
        }
        entry.state.set(MuxState::Subscribed);
        info!(type_url, "starting subscription");
        self.flush_interest(type_url, &entry);
    }

    /// Suppresses interest flushes for the type. Reference-counted; nested
    /// pauses are fine.
    pub fn pause(
        &self,
        type_url: &str,
    ) {
        let entry = self.entry(type_url);
        entry.pause_count.set(entry.pause_count.get() + 1);
        trace!(type_url, count = entry.pause_count.get(), "paused interest flushes");
    }

    /// Undoes one `pause`. When the count returns to zero, the union of
    /// every queued interest change is flushed in one request.
    pub fn resume(
        &self,
        type_url: &str,
    ) {
        let entry = self.entry(type_url);
        let count = entry.pause_count.get();
        assert!(count > 0, "resume() without matching pause() for {type_url}");
        entry.pause_count.set(count - 1);
        if count == 1 && entry.pending_flush.replace(false) {
            self.flush_interest(type_url, &entry);
        }
    }

    pub fn paused(
        &self,
        type_url: &str,
    ) -> bool {
        self.entry(type_url).pause_count.get() > 0
    }

    pub fn state(
        &self,
        type_url: &str,
    ) -> MuxState {
        self.entry(type_url).state.get()
    }

    /// Current aggregate interest for the type, for introspection. `None`
    /// when no watch is registered.
    pub fn interest_of(
        &self,
        type_url: &str,
    ) -> Option<InterestSet> {
        self.entry(type_url).watch_map.current_interest()
    }

    /// Transport entry point for an inbound batch of either wire variant.
    pub fn handle_response(
        &self,
        type_url: &str,
        batch: UpdateBatch,
    ) {
        trace!(type_url, version = batch.version(), "inbound update batch");
        match batch {
            UpdateBatch::FullState { resources, version } => {
                self.handle_full_response(type_url, resources, &version)
            }
            UpdateBatch::Delta {
                added,
                removed,
                version,
                is_heartbeat,
            } => self.handle_delta_response(type_url, added, removed, &version, is_heartbeat),
        }
    }

    /// Transport delivered a full-state response for the type.
    pub fn handle_full_response(
        &self,
        type_url: &str,
        resources: Vec<RawResource>,
        version: &str,
    ) {
        let Some(entry) = self.known_entry(type_url) else {
            warn!(type_url, "ignoring full-state response for unknown type");
            return;
        };
        entry.state.set(MuxState::Updating);
        trace!(type_url, count = resources.len(), version, "handling full-state response");
        match entry.watch_map.on_full_update(&resources, version) {
            Ok(()) => entry.state.set(MuxState::Subscribed),
            Err(error) => self.fail_batch(type_url, &entry, error),
        }
    }

    /// Transport delivered a delta response for the type.
    pub fn handle_delta_response(
        &self,
        type_url: &str,
        added: Vec<RawResource>,
        removed: Vec<ResourceName>,
        version: &str,
        is_heartbeat: bool,
    ) {
        let Some(entry) = self.known_entry(type_url) else {
            warn!(type_url, "ignoring delta response for unknown type");
            return;
        };
        if is_heartbeat {
            // Liveness only; nothing to fan out, the ack happens at the
            // transport layer.
            trace!(type_url, version, "delta heartbeat");
            return;
        }
        entry.state.set(MuxState::Updating);
        trace!(type_url, added = added.len(), removed = removed.len(), version,
               "handling delta response");
        if let Some(nameless) = added.iter().find(|r| r.name.is_empty()) {
            let error = UpdateError::BatchDecode(format!(
                "delta resource without a name (type {})",
                nameless.type_url
            ));
            self.fail_batch(type_url, &entry, error);
            return;
        }
        match entry.watch_map.on_delta_update(&added, &removed, version) {
            Ok(()) => entry.state.set(MuxState::Subscribed),
            Err(error) => self.fail_batch(type_url, &entry, error),
        }
    }

    /// Transport lost its stream/connection. Already-applied snapshots are
    /// unaffected; watches are told the type is not authoritative.
    pub fn handle_transport_failure(
        &self,
        type_url: &str,
        detail: &UpdateError,
    ) {
        let Some(entry) = self.known_entry(type_url) else {
            return;
        };
        warn!(type_url, %detail, "transport failure");
        entry
            .watch_map
            .on_update_failed(ConfigUpdateFailureReason::TransportFailure, Some(detail));
    }

    fn fail_batch(
        &self,
        type_url: &str,
        entry: &TypeEntry,
        error: UpdateError,
    ) {
        warn!(type_url, %error, "update batch could not be decoded");
        entry.state.set(MuxState::Failed);
        entry
            .watch_map
            .on_update_failed(ConfigUpdateFailureReason::BatchDecodeFailure, Some(&error));
    }

    fn entry(
        &self,
        type_url: &str,
    ) -> Rc<TypeEntry> {
        Rc::clone(
            self.types
                .borrow_mut()
                .entry(type_url.to_string())
                .or_insert_with(TypeEntry::new),
        )
    }

    fn known_entry(
        &self,
        type_url: &str,
    ) -> Option<Rc<TypeEntry>> {
        self.types.borrow().get(type_url).cloned()
    }

    fn flush_interest(
        &self,
        type_url: &str,
        entry: &TypeEntry,
    ) {
        if entry.pause_count.get() > 0 {
            entry.pending_flush.set(true);
            return;
        }
        if entry.state.get() == MuxState::Uninitialized {
            // Nothing is subscribed upstream before start().
            return;
        }
        self.send_interest(type_url, entry, entry.watch_map.current_interest());
    }

    fn send_interest(
        &self,
        type_url: &str,
        entry: &TypeEntry,
        interest: Option<InterestSet>,
    ) {
        let next = match interest {
            Some(interest) => SentInterest::Interest(interest),
            None => SentInterest::Cleared,
        };
        if next == SentInterest::Cleared && entry.last_sent.borrow().is_none() {
            // Never subscribed, nothing to clear.
            return;
        }
        if entry.last_sent.borrow().as_ref() == Some(&next) {
            return;
        }
        match &next {
            SentInterest::Interest(interest) => {
                debug!(type_url, ?interest, "updating upstream interest");
                self.transport.set_interest(type_url, interest);
            }
            SentInterest::Cleared => {
                debug!(type_url, "last watch gone, unsubscribing from type");
                self.transport.clear_interest(type_url);
            }
        }
        *entry.last_sent.borrow_mut() = Some(next);
    }
}
