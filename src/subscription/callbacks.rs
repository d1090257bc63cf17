use crate::{ConfigUpdateFailureReason, DecodedResource, ResourceName, UpdateError, UpdateRejection};

/// Callbacks a consumer registers to observe one type's configuration.
///
/// All three methods run synchronously on the control thread. Returning
/// `Err` from an update callback rejects the update; the engine keeps the
/// previously accepted configuration authoritative and reports the
/// rejection back through `on_config_update_failed`.
pub trait SubscriptionCallbacks {
    /// Full-state update: `resources` is the complete current set of
    /// resources this watch is interested in. An empty slice means the
    /// watch's previously held resources all vanished from upstream.
    fn on_config_update(
        &self,
        resources: &[DecodedResource],
        version_info: &str,
    ) -> std::result::Result<(), UpdateRejection>;

    /// Incremental update: only changed resources plus explicit removals.
    fn on_delta_config_update(
        &self,
        added: &[DecodedResource],
        removed: &[ResourceName],
        system_version_info: &str,
    ) -> std::result::Result<(), UpdateRejection>;

    /// The type's subscription is not authoritative right now. Invoked on
    /// every watch regardless of interest.
    fn on_config_update_failed(
        &self,
        reason: ConfigUpdateFailureReason,
        detail: Option<&UpdateError>,
    );
}
