//! Per-type resource interest tracker and update fan-out.
//!
//! The `WatchMap` owns every watch registered against one resource type.
//! It keeps a per-name reference count (the interest union) so the mux can
//! subscribe upstream to exactly the set of names some watch wants, and it
//! fans inbound updates out so each watch sees only the resources it asked
//! for — synthesizing "now empty" notifications on the full-state path
//! where the protocol carries no explicit removals.
//!
//! Everything here runs on the control thread; there is no locking because
//! there is no concurrency. Reentrancy, however, is real: a consumer
//! callback may remove its own or another watch mid-fan-out. Removals that
//! happen during a pass are tombstoned and physically erased only after
//! the pass completes.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::{
    ConfigUpdateFailureReason, DecodedResource, InterestSet, RawResource, ResourceDecoder,
    ResourceName, SubscriptionCallbacks, UpdateError, WILDCARD,
};

/// Opaque handle to a registered watch, valid until `remove_watch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Names the interest union gained and lost as a result of one call.
/// `added` contains names whose reference count went 0 -> 1 (or the `*`
/// marker when the first wildcard watch appeared); `removed` contains
/// names whose count dropped to 0 (or `*` when the last wildcard watch
/// left).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddedRemoved {
    pub added: BTreeSet<ResourceName>,
    pub removed: BTreeSet<ResourceName>,
}

impl AddedRemoved {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    fn merge(
        &mut self,
        other: AddedRemoved,
    ) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
    }
}

struct WatchEntry {
    callbacks: Rc<dyn SubscriptionCallbacks>,
    decoder: Rc<dyn ResourceDecoder>,
    interest: InterestSet,
    /// Names delivered in the last non-empty full-state update. Needed to
    /// know when to synthesize an empty update (Invariant 5).
    last_held: BTreeSet<ResourceName>,
}

#[derive(Default)]
pub struct WatchMap {
    watches: RefCell<BTreeMap<u64, WatchEntry>>,
    /// Reference counts: name -> ids of non-wildcard watches wanting it.
    name_interest: RefCell<HashMap<ResourceName, HashSet<u64>>>,
    wildcard_watches: RefCell<HashSet<u64>>,
    /// `Some` while a fan-out pass is running; removals land here instead
    /// of mutating the watch table mid-iteration.
    deferred_removals: RefCell<Option<Vec<u64>>>,
    next_id: Cell<u64>,
}

impl WatchMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new watch. It starts with wildcard interest: a watch
    /// that never names resources is interested in all of them.
    pub fn add_watch(
        &self,
        callbacks: Rc<dyn SubscriptionCallbacks>,
        decoder: Rc<dyn ResourceDecoder>,
    ) -> WatchId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.watches.borrow_mut().insert(
            id,
            WatchEntry {
                callbacks,
                decoder,
                interest: InterestSet::Wildcard,
                last_held: BTreeSet::new(),
            },
        );
        self.wildcard_watches.borrow_mut().insert(id);
        debug!(watch = id, "added watch");
        WatchId(id)
    }

    /// Replaces the watch's interest set and reports the resulting change
    /// to the interest union. An empty `names` set means "interested in
    /// everything", not "interested in nothing".
    ///
    /// Panics if the watch was already removed: that is a caller bug.
    pub fn update_watch_interest(
        &self,
        id: WatchId,
        names: BTreeSet<ResourceName>,
    ) -> AddedRemoved {
        let new_interest = InterestSet::from_names(names);
        let old_interest = {
            let mut watches = self.watches.borrow_mut();
            let entry = watches
                .get_mut(&id.0)
                .unwrap_or_else(|| panic!("interest update on removed watch {:?}", id));
            std::mem::replace(&mut entry.interest, new_interest.clone())
        };

        let mut result = AddedRemoved::default();
        match (&old_interest, &new_interest) {
            (InterestSet::Wildcard, InterestSet::Wildcard) => {}
            (InterestSet::Wildcard, InterestSet::Names(new_names)) => {
                self.drop_wildcard(id.0, &mut result);
                self.ref_names(id.0, new_names, &mut result);
            }
            (InterestSet::Names(old_names), InterestSet::Wildcard) => {
                self.take_wildcard(id.0, &mut result);
                self.unref_names(id.0, old_names, &mut result);
            }
            (InterestSet::Names(old_names), InterestSet::Names(new_names)) => {
                let added: BTreeSet<_> = new_names.difference(old_names).cloned().collect();
                let removed: BTreeSet<_> = old_names.difference(new_names).cloned().collect();
                self.ref_names(id.0, &added, &mut result);
                self.unref_names(id.0, &removed, &mut result);
            }
        }
        trace!(watch = id.0, added = ?result.added, removed = ?result.removed,
               "updated watch interest");
        result
    }

    /// Drops the watch. Safe to call from inside a fan-out callback: the
    /// removal is deferred until the current pass completes, and the watch
    /// receives nothing further within that pass.
    pub fn remove_watch(
        &self,
        id: WatchId,
    ) {
        if let Some(deferred) = self.deferred_removals.borrow_mut().as_mut() {
            debug!(watch = id.0, "deferring watch removal until fan-out completes");
            deferred.push(id.0);
            return;
        }
        self.erase_watch(id.0);
    }

    /// The exact set of names (or wildcard) some watch currently requires
    /// upstream, or `None` when no watch remains. The upstream
    /// subscription must always equal this value.
    pub fn current_interest(&self) -> Option<InterestSet> {
        if !self.wildcard_watches.borrow().is_empty() {
            return Some(InterestSet::Wildcard);
        }
        if self.watches.borrow().is_empty() {
            return None;
        }
        // Every non-wildcard watch holds a non-empty name set, so the
        // union here cannot be empty and cannot be misread as wildcard.
        Some(InterestSet::from_names(
            self.name_interest.borrow().keys().cloned().collect(),
        ))
    }

    pub fn watch_count(&self) -> usize {
        self.watches.borrow().len()
    }

    /// Full-state fan-out. Every watch whose interest intersects the batch
    /// receives its subset; a watch whose previously held content vanished
    /// receives exactly one empty update at the new version.
    pub fn on_full_update(
        &self,
        resources: &[RawResource],
        version: &str,
    ) -> std::result::Result<(), UpdateError> {
        let decoded = match self.decode_batch(resources)? {
            Some(decoded) => decoded,
            None => return Ok(()),
        };

        let _pass = self.begin_pass();
        for id in self.pass_ids() {
            let Some((callbacks, interest, had_content)) = self.watch_state(id) else {
                continue;
            };
            let subset: Vec<DecodedResource> = decoded
                .iter()
                .filter(|r| interest.covers(r.name()))
                .cloned()
                .collect();
            if !subset.is_empty() {
                let held: BTreeSet<ResourceName> =
                    subset.iter().map(|r| r.name().to_string()).collect();
                trace!(watch = id, count = subset.len(), version, "delivering full-state subset");
                if let Err(rejection) = callbacks.on_config_update(&subset, version) {
                    warn!(watch = id, %rejection, "watch rejected full-state update");
                }
                self.set_last_held(id, held);
            } else if had_content {
                // The update holds nothing this watch cares about, but the
                // watch previously held content. Tell it that content is
                // gone; full-state carries no explicit removals.
                trace!(watch = id, version, "synthesizing empty update");
                if let Err(rejection) = callbacks.on_config_update(&[], version) {
                    warn!(watch = id, %rejection, "watch rejected empty update");
                }
                self.set_last_held(id, BTreeSet::new());
            }
        }
        Ok(())
    }

    /// Delta fan-out. A watch is invoked iff the batch adds or removes
    /// something it is interested in; absence of a name is not itself
    /// informative in the delta protocol, so no empty-update synthesis.
    pub fn on_delta_update(
        &self,
        added: &[RawResource],
        removed: &[ResourceName],
        version: &str,
    ) -> std::result::Result<(), UpdateError> {
        if self.watches.borrow().is_empty() {
            debug!(version, "delta update with no watches registered");
            return Ok(());
        }
        let decoded = match self.decode_batch(added)? {
            Some(decoded) => decoded,
            None => Vec::new(),
        };

        let _pass = self.begin_pass();
        for id in self.pass_ids() {
            let Some((callbacks, interest, _)) = self.watch_state(id) else {
                continue;
            };
            // An added resource matches by its own name or any alias it
            // declares; removals match by name only.
            let added_subset: Vec<DecodedResource> = decoded
                .iter()
                .filter(|r| {
                    interest.covers(r.name()) || r.aliases().iter().any(|a| interest.covers(a))
                })
                .cloned()
                .collect();
            let removed_subset: Vec<ResourceName> = removed
                .iter()
                .filter(|name| interest.covers(name))
                .cloned()
                .collect();
            if added_subset.is_empty() && removed_subset.is_empty() {
                continue;
            }
            trace!(watch = id, added = added_subset.len(), removed = removed_subset.len(),
                   version, "delivering delta subset");
            if let Err(rejection) =
                callbacks.on_delta_config_update(&added_subset, &removed_subset, version)
            {
                warn!(watch = id, %rejection, "watch rejected delta update");
            }
        }
        Ok(())
    }

    /// The whole type's subscription is not authoritative right now.
    /// Broadcast to every watch regardless of interest.
    pub fn on_update_failed(
        &self,
        reason: ConfigUpdateFailureReason,
        detail: Option<&UpdateError>,
    ) {
        let _pass = self.begin_pass();
        for id in self.pass_ids() {
            let Some((callbacks, _, _)) = self.watch_state(id) else {
                continue;
            };
            callbacks.on_config_update_failed(reason, detail);
        }
    }

    /// A resource's declared aliases changed: drop watch interest in
    /// aliases the resource declares, keeping every other name intact. An
    /// alias equal to the resource's own name is still subject to removal.
    pub fn remove_alias_watches(
        &self,
        resource: &DecodedResource,
    ) -> AddedRemoved {
        let aliases: BTreeSet<&str> = resource.aliases().iter().map(String::as_str).collect();
        let prunable: Vec<(u64, BTreeSet<ResourceName>)> = self
            .watches
            .borrow()
            .iter()
            .filter_map(|(&id, entry)| match &entry.interest {
                InterestSet::Wildcard => None,
                InterestSet::Names(names) => {
                    let remaining: BTreeSet<ResourceName> = names
                        .iter()
                        .filter(|n| !aliases.contains(n.as_str()))
                        .cloned()
                        .collect();
                    (remaining.len() != names.len()).then_some((id, remaining))
                }
            })
            .collect();

        let mut result = AddedRemoved::default();
        for (id, remaining) in prunable {
            if remaining.is_empty() {
                // Pruning to nothing would flip the watch to wildcard under
                // the empty-means-everything convention. Leave it alone.
                warn!(watch = id, resource = resource.name(),
                      "skipping alias prune that would empty the watch's interest");
                continue;
            }
            result.merge(self.update_watch_interest(WatchId(id), remaining));
        }
        result
    }

    /// Decodes the batch once, using the first live watch's decoder (all
    /// watches of a type share a payload type). Returns `None` when there
    /// is no watch to decode for. Duplicate names make the whole batch
    /// malformed.
    fn decode_batch(
        &self,
        resources: &[RawResource],
    ) -> std::result::Result<Option<Vec<DecodedResource>>, UpdateError> {
        let decoder = {
            let watches = self.watches.borrow();
            match watches.values().next() {
                Some(entry) => Rc::clone(&entry.decoder),
                None => {
                    debug!("update with no watches registered");
                    return Ok(None);
                }
            }
        };
        let mut decoded = Vec::with_capacity(resources.len());
        for raw in resources {
            let resource = decoder.decode(raw)?;
            decoded.push(resource);
        }
        let mut seen: HashSet<&str> = HashSet::with_capacity(decoded.len());
        for resource in &decoded {
            if !seen.insert(resource.name()) {
                return Err(UpdateError::BatchDecode(format!(
                    "duplicate resource {:?} in update batch",
                    resource.name()
                )));
            }
        }
        Ok(Some(decoded))
    }

    fn pass_ids(&self) -> Vec<u64> {
        self.watches.borrow().keys().copied().collect()
    }

    /// Snapshot of one watch's callback handle and interest, or `None` if
    /// it was tombstoned earlier in the current pass.
    fn watch_state(
        &self,
        id: u64,
    ) -> Option<(Rc<dyn SubscriptionCallbacks>, InterestSet, bool)> {
        if let Some(deferred) = self.deferred_removals.borrow().as_ref() {
            if deferred.contains(&id) {
                return None;
            }
        }
        let watches = self.watches.borrow();
        let entry = watches.get(&id)?;
        Some((
            Rc::clone(&entry.callbacks),
            entry.interest.clone(),
            !entry.last_held.is_empty(),
        ))
    }

    fn set_last_held(
        &self,
        id: u64,
        held: BTreeSet<ResourceName>,
    ) {
        if let Some(entry) = self.watches.borrow_mut().get_mut(&id) {
            entry.last_held = held;
        }
    }

    fn begin_pass(&self) -> PassGuard<'_> {
        let mut deferred = self.deferred_removals.borrow_mut();
        assert!(
            deferred.is_none(),
            "reentrant update fan-out: callbacks must not deliver updates"
        );
        *deferred = Some(Vec::new());
        PassGuard { map: self }
    }

    fn erase_watch(
        &self,
        id: u64,
    ) {
        let Some(entry) = self.watches.borrow_mut().remove(&id) else {
            debug!(watch = id, "remove of already-removed watch ignored");
            return;
        };
        match entry.interest {
            InterestSet::Wildcard => {
                self.wildcard_watches.borrow_mut().remove(&id);
            }
            InterestSet::Names(names) => {
                let mut interest = self.name_interest.borrow_mut();
                for name in names {
                    if let Some(ids) = interest.get_mut(&name) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            interest.remove(&name);
                        }
                    }
                }
            }
        }
        debug!(watch = id, "removed watch");
    }

    fn ref_names(
        &self,
        id: u64,
        names: &BTreeSet<ResourceName>,
        result: &mut AddedRemoved,
    ) {
        let mut interest = self.name_interest.borrow_mut();
        for name in names {
            let ids = interest.entry(name.clone()).or_default();
            ids.insert(id);
            if ids.len() == 1 {
                result.added.insert(name.clone());
            }
        }
    }

    fn unref_names(
        &self,
        id: u64,
        names: &BTreeSet<ResourceName>,
        result: &mut AddedRemoved,
    ) {
        let mut interest = self.name_interest.borrow_mut();
        for name in names {
            if let Some(ids) = interest.get_mut(name) {
                ids.remove(&id);
                if ids.is_empty() {
                    interest.remove(name);
                    result.removed.insert(name.clone());
                }
            }
        }
    }

    fn take_wildcard(
        &self,
        id: u64,
        result: &mut AddedRemoved,
    ) {
        let mut wildcards = self.wildcard_watches.borrow_mut();
        let was_empty = wildcards.is_empty();
        wildcards.insert(id);
        if was_empty {
            result.added.insert(WILDCARD.to_string());
        }
    }

    fn drop_wildcard(
        &self,
        id: u64,
        result: &mut AddedRemoved,
    ) {
        let mut wildcards = self.wildcard_watches.borrow_mut();
        wildcards.remove(&id);
        if wildcards.is_empty() {
            result.removed.insert(WILDCARD.to_string());
        }
    }
}

/// Ends the fan-out pass on drop, physically erasing tombstoned watches.
struct PassGuard<'a> {
    map: &'a WatchMap,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let deferred = self
            .map
            .deferred_removals
            .borrow_mut()
            .take()
            .expect("fan-out pass ended twice");
        for id in deferred {
            self.map.erase_watch(id);
        }
    }
}
