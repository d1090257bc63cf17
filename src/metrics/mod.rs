//! Prometheus counters for subscription accounting.
//!
//! Four monotonic counters per resource type plus a gauge holding a hash
//! of the last accepted version string. Rendering/export is out of scope;
//! an embedding process registers `REGISTRY` with whatever exporter it
//! runs.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

lazy_static! {
    pub static ref UPDATE_ATTEMPT_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_update_attempt", "Subscription requests sent upstream"),
        &["type_url"]
    )
    .expect("metric can not be created");

    pub static ref UPDATE_SUCCESS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_update_success", "Configuration updates accepted"),
        &["type_url"]
    )
    .expect("metric can not be created");

    pub static ref UPDATE_FAILURE_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_update_failure", "Configuration updates that failed to arrive"),
        &["type_url"]
    )
    .expect("metric can not be created");

    pub static ref UPDATE_REJECTED_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_update_rejected", "Configuration updates rejected by consumers"),
        &["type_url"]
    )
    .expect("metric can not be created");

    pub static ref VERSION_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("subscription_version", "Hash of the last accepted version string"),
        &["type_url"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub fn register_custom_metrics() {
    REGISTRY
        .register(Box::new(UPDATE_ATTEMPT_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(UPDATE_SUCCESS_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(UPDATE_FAILURE_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(UPDATE_REJECTED_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(VERSION_METRIC.clone()))
        .expect("collector can be registered");
}

/// Per-subscription counter handles, labelled by resource type URL.
#[derive(Clone)]
pub struct SubscriptionStats {
    pub update_attempt: IntCounter,
    pub update_success: IntCounter,
    pub update_failure: IntCounter,
    pub update_rejected: IntCounter,
    pub version: IntGauge,
}

impl SubscriptionStats {
    pub fn for_type(type_url: &str) -> Self {
        Self {
            update_attempt: UPDATE_ATTEMPT_METRIC.with_label_values(&[type_url]),
            update_success: UPDATE_SUCCESS_METRIC.with_label_values(&[type_url]),
            update_failure: UPDATE_FAILURE_METRIC.with_label_values(&[type_url]),
            update_rejected: UPDATE_REJECTED_METRIC.with_label_values(&[type_url]),
            version: VERSION_METRIC.with_label_values(&[type_url]),
        }
    }
}
