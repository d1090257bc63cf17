//! Creates subscriptions from named transport bindings.
//!
//! Bindings are registered up front by the embedding process; each binding
//! lazily materializes one shared `Mux`, so every subscription created
//! against the same binding aggregates onto the same upstream connection.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use config::ConfigError;
use tracing::info;

use crate::config::SubscriptionConfig;
use crate::mux::Mux;
use crate::timer::TimerFactory;
use crate::{Error, ResourceDecoder, Result, SubscriptionCallbacks, SubscriptionFacade};

/// A way to reach one control plane. `create_mux` is called at most once
/// per factory; the mux it returns is shared by every subscription on the
/// binding.
pub trait TransportBinding {
    fn create_mux(&self) -> Rc<Mux>;
}

pub struct SubscriptionFactory {
    bindings: HashMap<String, Rc<dyn TransportBinding>>,
    muxes: RefCell<HashMap<String, Rc<Mux>>>,
    timer_factory: Rc<dyn TimerFactory>,
    config: SubscriptionConfig,
}

impl SubscriptionFactory {
    pub fn new(
        bindings: HashMap<String, Rc<dyn TransportBinding>>,
        timer_factory: Rc<dyn TimerFactory>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            bindings,
            muxes: RefCell::new(HashMap::new()),
            timer_factory,
            config,
        }
    }

    /// Builds an unstarted subscription for `type_url` on the named
    /// binding. The caller keeps the facade alive for as long as it wants
    /// updates and calls `start` when ready.
    pub fn subscription_from_binding(
        &self,
        binding: &str,
        type_url: &str,
        consumer: Rc<dyn SubscriptionCallbacks>,
        decoder: Rc<dyn ResourceDecoder>,
    ) -> Result<SubscriptionFacade> {
        let mux = self.mux_for(binding)?;
        Ok(SubscriptionFacade::new(
            mux,
            type_url,
            consumer,
            decoder,
            Rc::clone(&self.timer_factory),
            self.config.init_fetch_timeout(),
        ))
    }

    /// As `subscription_from_binding`, on the binding configured as the
    /// default.
    pub fn subscription(
        &self,
        type_url: &str,
        consumer: Rc<dyn SubscriptionCallbacks>,
        decoder: Rc<dyn ResourceDecoder>,
    ) -> Result<SubscriptionFacade> {
        let binding = self.config.transport_binding.clone();
        self.subscription_from_binding(&binding, type_url, consumer, decoder)
    }

    /// The shared mux of a binding, creating it on first use. The
    /// embedding process hands this to the transport so inbound responses
    /// can be delivered.
    pub fn mux_for(
        &self,
        binding: &str,
    ) -> Result<Rc<Mux>> {
        if let Some(mux) = self.muxes.borrow().get(binding) {
            return Ok(Rc::clone(mux));
        }
        let factory = self.bindings.get(binding).ok_or_else(|| {
            Error::Config(ConfigError::Message(format!(
                "unknown transport binding {binding:?}"
            )))
        })?;
        info!(binding, "creating mux for transport binding");
        let mux = factory.create_mux();
        self.muxes
            .borrow_mut()
            .insert(binding.to_string(), Rc::clone(&mux));
        Ok(mux)
    }
}
