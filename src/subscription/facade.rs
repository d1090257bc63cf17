//! Consumer-facing subscription handle.
//!
//! A `SubscriptionFacade` wraps one watch on one mux: it owns the watch's
//! lifecycle, keeps the per-type counters, runs the initial-fetch timeout,
//! and sits between the fan-out path and the consumer's callbacks so that
//! accounting happens in exactly one place.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::metrics::SubscriptionStats;
use crate::mux::Mux;
use crate::timer::{ArmedTimer, TimerFactory};
use crate::utils::content_hash;
use crate::{
    ConfigUpdateFailureReason, DecodedResource, ResourceDecoder, ResourceName,
    SubscriptionCallbacks, UpdateError, UpdateRejection, WatchId,
};

/// Interposed callbacks: account for the outcome, manage the initial-fetch
/// timer, then hand the update to the consumer.
pub(crate) struct FacadeInner {
    type_url: String,
    consumer: Rc<dyn SubscriptionCallbacks>,
    stats: SubscriptionStats,
    latest_version: RefCell<String>,
    timer: RefCell<Option<Box<dyn ArmedTimer>>>,
}

impl FacadeInner {
    fn record_success(
        &self,
        version_info: &str,
    ) {
        self.stats.update_success.inc();
        self.stats
            .version
            .set(content_hash(&version_info.to_string()) as i64);
        *self.latest_version.borrow_mut() = version_info.to_string();
    }

    fn disable_init_fetch_timer(&self) {
        // Dropping the handle cancels the timer.
        self.timer.borrow_mut().take();
    }

    fn initial_fetch_timed_out(&self) {
        warn!(type_url = %self.type_url, "no initial response within the fetch timeout");
        self.disable_init_fetch_timer();
        self.on_config_update_failed(
            ConfigUpdateFailureReason::InitialFetchTimeout,
            Some(&UpdateError::InitialFetchTimeout),
        );
    }

    fn reject(
        &self,
        rejection: UpdateRejection,
    ) -> UpdateRejection {
        self.stats.update_rejected.inc();
        warn!(type_url = %self.type_url, %rejection, "consumer rejected configuration update");
        self.consumer
            .on_config_update_failed(ConfigUpdateFailureReason::UpdateRejected, None);
        rejection
    }
}

impl SubscriptionCallbacks for FacadeInner {
    fn on_config_update(
        &self,
        resources: &[DecodedResource],
        version_info: &str,
    ) -> std::result::Result<(), UpdateRejection> {
        self.disable_init_fetch_timer();
        match self.consumer.on_config_update(resources, version_info) {
            Ok(()) => {
                self.record_success(version_info);
                Ok(())
            }
            Err(rejection) => Err(self.reject(rejection)),
        }
    }

    fn on_delta_config_update(
        &self,
        added: &[DecodedResource],
        removed: &[ResourceName],
        system_version_info: &str,
    ) -> std::result::Result<(), UpdateRejection> {
        self.disable_init_fetch_timer();
        match self
            .consumer
            .on_delta_config_update(added, removed, system_version_info)
        {
            Ok(()) => {
                self.record_success(system_version_info);
                Ok(())
            }
            Err(rejection) => Err(self.reject(rejection)),
        }
    }

    fn on_config_update_failed(
        &self,
        reason: ConfigUpdateFailureReason,
        detail: Option<&UpdateError>,
    ) {
        match reason {
            // The stream will reconnect; keep the initial-fetch timer
            // running so startup still unblocks if it never does.
            ConfigUpdateFailureReason::TransportFailure => {
                self.stats.update_failure.inc();
            }
            ConfigUpdateFailureReason::BatchDecodeFailure
            | ConfigUpdateFailureReason::InitialFetchTimeout => {
                self.stats.update_failure.inc();
                self.disable_init_fetch_timer();
            }
            // Counted at rejection time; the broadcast must not double it.
            ConfigUpdateFailureReason::UpdateRejected => {
                self.disable_init_fetch_timer();
            }
        }
        self.consumer.on_config_update_failed(reason, detail);
    }
}

pub struct SubscriptionFacade {
    mux: Rc<Mux>,
    type_url: String,
    inner: Rc<FacadeInner>,
    watch: Cell<Option<WatchId>>,
    decoder: Rc<dyn ResourceDecoder>,
    timer_factory: Rc<dyn TimerFactory>,
    init_fetch_timeout: Duration,
}

impl SubscriptionFacade {
    pub fn new(
        mux: Rc<Mux>,
        type_url: impl Into<String>,
        consumer: Rc<dyn SubscriptionCallbacks>,
        decoder: Rc<dyn ResourceDecoder>,
        timer_factory: Rc<dyn TimerFactory>,
        init_fetch_timeout: Duration,
    ) -> Self {
        let type_url = type_url.into();
        Self {
            mux,
            inner: Rc::new(FacadeInner {
                type_url: type_url.clone(),
                consumer,
                stats: SubscriptionStats::for_type(&type_url),
                latest_version: RefCell::new(String::new()),
                timer: RefCell::new(None),
            }),
            type_url,
            watch: Cell::new(None),
            decoder,
            timer_factory,
            init_fetch_timeout,
        }
    }

    /// Registers the watch and activates the type's upstream subscription.
    /// An empty `names` set subscribes to everything.
    ///
    /// Panics when called twice; a facade is one watch.
    pub fn start(
        &self,
        names: BTreeSet<ResourceName>,
    ) {
        assert!(self.watch.get().is_none(), "subscription already started");
        self.inner.stats.update_attempt.inc();
        self.arm_init_fetch_timer();

        // Pause so registration and interest narrowing reach the transport
        // as a single request.
        self.mux.pause(&self.type_url);
        let id = self.mux.add_watch(
            &self.type_url,
            Rc::clone(&self.inner) as Rc<dyn SubscriptionCallbacks>,
            Rc::clone(&self.decoder),
        );
        self.mux.update_watch(&self.type_url, id, names);
        self.watch.set(Some(id));
        self.mux.start(&self.type_url);
        self.mux.resume(&self.type_url);
    }

    /// Replaces the set of resource names this subscription cares about.
    pub fn update_resource_interest(
        &self,
        names: BTreeSet<ResourceName>,
    ) {
        let id = self
            .watch
            .get()
            .expect("interest update on a subscription that was never started");
        self.inner.stats.update_attempt.inc();
        let diff = self.mux.update_watch(&self.type_url, id, names);
        debug!(type_url = %self.type_url, added = ?diff.added, removed = ?diff.removed,
               "subscription interest updated");
    }

    /// Suppresses upstream interest flushes for this facade's type until
    /// the matching `resume`. Reference-counted across facades.
    pub fn pause(&self) {
        self.mux.pause(&self.type_url);
    }

    pub fn resume(&self) {
        self.mux.resume(&self.type_url);
    }

    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Version string of the last update this subscription accepted.
    pub fn version_info(&self) -> String {
        self.inner.latest_version.borrow().clone()
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.inner.stats
    }

    fn arm_init_fetch_timer(&self) {
        if self.init_fetch_timeout.is_zero() {
            return;
        }
        let weak: Weak<FacadeInner> = Rc::downgrade(&self.inner);
        let timer = self.timer_factory.arm(
            self.init_fetch_timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.initial_fetch_timed_out();
                }
            }),
        );
        *self.inner.timer.borrow_mut() = Some(timer);
    }
}

impl Drop for SubscriptionFacade {
    fn drop(&mut self) {
        self.inner.disable_init_fetch_timer();
        if let Some(id) = self.watch.take() {
            self.mux.remove_watch(&self.type_url, id);
        }
    }
}
