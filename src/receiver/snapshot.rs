use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwapOption;

use super::ConfigSchema;

/// Immutable, content-hashed, versioned unit of accepted configuration.
///
/// Created on first accept, replaced (never mutated) on each subsequent
/// accept, and read concurrently by worker threads through
/// `SnapshotReader`. An old snapshot lives for as long as any reader still
/// holds its `Arc`.
pub struct ConfigSnapshot<C: ConfigSchema> {
    config: C,
    sub_resources: BTreeMap<String, C::Sub>,
    hash: u64,
    version: String,
    last_updated: SystemTime,
}

impl<C: ConfigSchema> ConfigSnapshot<C> {
    pub(crate) fn new(
        config: C,
        sub_resources: BTreeMap<String, C::Sub>,
        hash: u64,
        version: String,
    ) -> Self {
        Self {
            config,
            sub_resources,
            hash,
            version,
            last_updated: SystemTime::now(),
        }
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// Keyed sub-resources merged from incremental updates (or extracted
    /// from the last full update).
    pub fn sub_resources(&self) -> &BTreeMap<String, C::Sub> {
        &self.sub_resources
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Version at which the published content last changed. The receiver's
    /// `version_info()` may be newer when no-op updates were acknowledged.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn last_updated(&self) -> SystemTime {
        self.last_updated
    }
}

pub(crate) type SnapshotSlot<C> = ArcSwapOption<ConfigSnapshot<C>>;

/// Worker-thread handle for lock-free snapshot reads.
///
/// `load` returns either the fully-old or the fully-new snapshot, never a
/// partially constructed one; publication is an atomic pointer swap.
pub struct SnapshotReader<C: ConfigSchema> {
    slot: Arc<SnapshotSlot<C>>,
}

impl<C: ConfigSchema> SnapshotReader<C> {
    pub(crate) fn new(slot: Arc<SnapshotSlot<C>>) -> Self {
        Self { slot }
    }

    pub fn load(&self) -> Option<Arc<ConfigSnapshot<C>>> {
        self.slot.load_full()
    }
}

impl<C: ConfigSchema> Clone for SnapshotReader<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}
