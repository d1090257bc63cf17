//! Typed receiver that turns decoded resources into published snapshots.
//!
//! Single-writer: all `apply_*` calls happen on the control thread.
//! Publication is an atomic swap of the snapshot slot, so worker threads
//! reading through `SnapshotReader` never block and never observe a torn
//! snapshot. A rejected update leaves the previously published snapshot
//! untouched (last-known-good).

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use super::{ConfigSchema, ConfigSnapshot, NoopHooks, SnapshotReader, SnapshotSlot, UpdateHooks, UpdateOutcome};
use crate::utils::content_hash;
use crate::UpdateRejection;

pub struct ConfigUpdateReceiver<C: ConfigSchema> {
    slot: Arc<SnapshotSlot<C>>,
    /// Merged keyed sub-resource map; committed only when an update is
    /// accepted, so rejection never partially mutates state.
    sub_resources: RefCell<BTreeMap<String, C::Sub>>,
    latest_version: RefCell<String>,
    last_updated: Cell<SystemTime>,
    hooks: Rc<dyn UpdateHooks>,
    applying: Cell<bool>,
}

impl<C: ConfigSchema> ConfigUpdateReceiver<C> {
    pub fn new() -> Self {
        Self::with_hooks(Rc::new(NoopHooks))
    }

    pub fn with_hooks(hooks: Rc<dyn UpdateHooks>) -> Self {
        Self {
            slot: Arc::new(SnapshotSlot::empty()),
            sub_resources: RefCell::new(BTreeMap::new()),
            latest_version: RefCell::new(String::new()),
            last_updated: Cell::new(SystemTime::UNIX_EPOCH),
            hooks,
            applying: Cell::new(false),
        }
    }

    /// Applies a complete resource. Publishes a new snapshot only when the
    /// content hash actually changed; a byte-identical update still
    /// acknowledges the new version so the transport can ack correctly.
    pub fn apply_full(
        &self,
        config: C,
        version_info: &str,
    ) -> std::result::Result<UpdateOutcome, UpdateRejection> {
        self.assert_not_reentrant();
        config.validate().map_err(UpdateRejection::new)?;

        let hash = content_hash(&config);
        if let Some(current) = self.slot.load_full() {
            if current.hash() == hash {
                debug!(name = config.name(), version = version_info,
                       "full update is a no-op, acknowledging version only");
                self.ack_version(version_info);
                return Ok(UpdateOutcome::NoChange);
            }
        }

        let sub_resources: BTreeMap<String, C::Sub> = config.sub_entries().into_iter().collect();
        info!(name = config.name(), version = version_info, hash,
              "publishing new configuration snapshot");
        self.publish(config, sub_resources, hash, version_info);
        Ok(UpdateOutcome::Published)
    }

    /// Merges keyed additions/removals into the current sub-resource map
    /// and publishes a derived full snapshot. Requires a previously
    /// accepted full update as the merge base.
    pub fn apply_incremental(
        &self,
        added: Vec<(String, C::Sub)>,
        removed: Vec<String>,
        version_info: &str,
    ) -> std::result::Result<UpdateOutcome, UpdateRejection> {
        self.assert_not_reentrant();
        let base = self
            .slot
            .load_full()
            .ok_or_else(|| UpdateRejection::new("incremental update without a base configuration"))?;

        let mut merged = self.sub_resources.borrow().clone();
        let mut changed = false;
        for (key, value) in added {
            if merged.get(&key) != Some(&value) {
                merged.insert(key, value);
                changed = true;
            }
        }
        for key in removed {
            if merged.remove(&key).is_some() {
                changed = true;
            }
        }
        if !changed {
            debug!(name = base.config().name(), version = version_info,
                   "incremental update is a no-op, acknowledging version only");
            self.ack_version(version_info);
            return Ok(UpdateOutcome::NoChange);
        }

        let derived = base.config().with_sub_entries(&merged);
        derived.validate().map_err(UpdateRejection::new)?;
        let hash = content_hash(&derived);
        if hash == base.hash() {
            self.ack_version(version_info);
            return Ok(UpdateOutcome::NoChange);
        }
        info!(name = derived.name(), version = version_info, hash,
              "publishing incrementally merged configuration snapshot");
        self.publish(derived, merged, hash, version_info);
        Ok(UpdateOutcome::Published)
    }

    /// Control-thread read of the current snapshot.
    pub fn current_snapshot(&self) -> Option<Arc<ConfigSnapshot<C>>> {
        self.slot.load_full()
    }

    /// Cloneable handle for worker threads; reads are lock-free.
    pub fn reader(&self) -> SnapshotReader<C> {
        SnapshotReader::new(Arc::clone(&self.slot))
    }

    /// Last acknowledged version, including no-op acknowledgements.
    pub fn version_info(&self) -> String {
        self.latest_version.borrow().clone()
    }

    pub fn last_updated(&self) -> SystemTime {
        self.last_updated.get()
    }

    fn publish(
        &self,
        config: C,
        sub_resources: BTreeMap<String, C::Sub>,
        hash: u64,
        version_info: &str,
    ) {
        self.applying.set(true);
        self.hooks.before_update();
        *self.sub_resources.borrow_mut() = sub_resources.clone();
        let snapshot = ConfigSnapshot::new(config, sub_resources, hash, version_info.to_string());
        self.slot.store(Some(Arc::new(snapshot)));
        self.ack_version(version_info);
        self.hooks.after_update();
        self.applying.set(false);
    }

    fn ack_version(
        &self,
        version_info: &str,
    ) {
        *self.latest_version.borrow_mut() = version_info.to_string();
        self.last_updated.set(SystemTime::now());
    }

    fn assert_not_reentrant(&self) {
        assert!(
            !self.applying.get(),
            "reentrant config update: hooks must not apply updates themselves"
        );
    }
}

impl<C: ConfigSchema> Default for ConfigUpdateReceiver<C> {
    fn default() -> Self {
        Self::new()
    }
}
