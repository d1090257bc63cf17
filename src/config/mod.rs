//! Engine settings.
//!
//! Loaded from an optional TOML file plus `XDS_`-prefixed environment
//! variables (environment wins). Everything has a default, so an embedding
//! process with no config file still gets a working engine.

mod subscription;
pub use subscription::*;

#[cfg(test)]
mod subscription_test;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Subscription lifecycle parameters
    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

impl Settings {
    /// Load configuration with priority:
    /// 1. Default values
    /// 2. Optional config file
    /// 3. Environment variables (highest priority)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        if let Some(path) = path {
            config = config.add_source(File::with_name(path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("XDS")
                .prefix_separator("_")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.subscription.validate()
    }
}
