use std::time::Duration;

use config::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Parameters applied to every subscription created through the factory.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionConfig {
    /// Name of the transport binding new subscriptions attach to
    #[serde(default = "default_transport_binding")]
    pub transport_binding: String,

    /// How long a freshly started subscription waits for any response
    /// before reporting a fetch timeout (0 disables the timer)
    #[serde(default = "default_init_fetch_timeout")]
    pub init_fetch_timeout_in_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            transport_binding: default_transport_binding(),
            init_fetch_timeout_in_ms: default_init_fetch_timeout(),
        }
    }
}

impl SubscriptionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.transport_binding.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "transport_binding must not be empty".into(),
            )));
        }
        Ok(())
    }

    pub fn init_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.init_fetch_timeout_in_ms)
    }
}

fn default_transport_binding() -> String {
    "default".to_string()
}
// in ms
fn default_init_fetch_timeout() -> u64 {
    15_000
}
