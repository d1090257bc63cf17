mod snapshot;
mod update_receiver;
pub use snapshot::*;
pub use update_receiver::*;


use std::collections::BTreeMap;

use serde::Serialize;

/// Shape contract for a configuration resource handled by
/// `ConfigUpdateReceiver`.
///
/// Implementations are plain data types (a route table, a listener set).
/// The keyed sub-entry methods exist for resources that are internally
/// keyed collections and receive partial updates; leaf resources can keep
/// the default empty implementations.
pub trait ConfigSchema: Clone + Serialize + 'static {
    /// Keyed sub-resource type (e.g. a virtual host within a route table).
    type Sub: Clone + PartialEq + 'static;

    fn name(&self) -> &str;

    /// Structural/semantic validation. `Err` rejects the update and keeps
    /// the previously published snapshot authoritative.
    fn validate(&self) -> std::result::Result<(), String>;

    /// Extracts the keyed sub-resource collection from a full resource.
    fn sub_entries(&self) -> Vec<(String, Self::Sub)> {
        Vec::new()
    }

    /// Rebuilds a derived full resource from a merged sub-resource map.
    fn with_sub_entries(
        &self,
        entries: &BTreeMap<String, Self::Sub>,
    ) -> Self {
        let _ = entries;
        self.clone()
    }
}

/// Whether an accepted update changed published content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new snapshot was published.
    Published,
    /// Content was byte-identical (or the merge was a no-net-change); the
    /// new version was acknowledged without touching the snapshot.
    NoChange,
}

/// Extension points invoked around snapshot publication, on the control
/// thread. Hooks must not re-enter `apply_full`/`apply_incremental`; doing
/// so is a caller bug and panics.
pub trait UpdateHooks {
    fn before_update(&self) {}
    fn after_update(&self) {}
}

/// Default hooks: do nothing.
pub struct NoopHooks;

impl UpdateHooks for NoopHooks {}
