use std::time::Duration;

use serial_test::serial;

use super::{Settings, SubscriptionConfig};

#[test]
fn test_defaults() {
    let config = SubscriptionConfig::default();
    assert_eq!(config.transport_binding, "default");
    assert_eq!(config.init_fetch_timeout(), Duration::from_millis(15_000));
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_binding_rejected() {
    let config = SubscriptionConfig {
        transport_binding: String::new(),
        ..SubscriptionConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_timeout_disables_timer() {
    let config = SubscriptionConfig {
        init_fetch_timeout_in_ms: 0,
        ..SubscriptionConfig::default()
    };
    assert!(config.validate().is_ok());
    assert!(config.init_fetch_timeout().is_zero());
}

// Reads process environment, so no parallel env mutation.
#[test]
#[serial]
fn test_settings_load_without_file() {
    let settings = Settings::load(None).expect("defaults load");
    assert_eq!(settings.subscription.transport_binding, "default");
}

#[test]
#[serial]
fn test_environment_overrides() {
    std::env::set_var("XDS_SUBSCRIPTION__INIT_FETCH_TIMEOUT_IN_MS", "250");
    let settings = Settings::load(None).expect("defaults load");
    std::env::remove_var("XDS_SUBSCRIPTION__INIT_FETCH_TIMEOUT_IN_MS");
    assert_eq!(settings.subscription.init_fetch_timeout_in_ms, 250);
}
