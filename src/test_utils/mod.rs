//! Shared fixtures for unit tests: recording callback/transport doubles, a
//! manually fired timer, and small payload/schema types.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timer::{ArmedTimer, TimerFactory};
use crate::{
    BincodeDecoder, ConfigSchema, ConfigUpdateFailureReason, DecodedResource, InterestSet,
    NamedPayload, RawResource, ResourceName, SubscriptionCallbacks, SubscriptionTransport,
    UpdateError, UpdateRejection,
};

pub const TEST_TYPE_URL: &str = "test.v1.Endpoint";

/// What one callback double observed, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackEvent {
    Update {
        names: Vec<String>,
        version: String,
    },
    DeltaUpdate {
        added: Vec<String>,
        removed: Vec<String>,
        version: String,
    },
    Failed {
        reason: ConfigUpdateFailureReason,
    },
}

/// Callback double that records every invocation. `reject_next` makes the
/// next update callback return an error; `on_update_hook` runs inside the
/// callback, for tests that mutate the watch map mid-fan-out.
#[derive(Default)]
pub struct RecordingCallbacks {
    pub events: RefCell<Vec<CallbackEvent>>,
    pub reject_next: Cell<bool>,
    pub on_update_hook: RefCell<Option<Box<dyn Fn()>>>,
}

impl RecordingCallbacks {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.borrow().clone()
    }

    pub fn last_event(&self) -> CallbackEvent {
        self.events.borrow().last().expect("no events recorded").clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.borrow().len()
    }

    /// Resource names from the most recent full-state update.
    pub fn last_update_names(&self) -> Vec<String> {
        for event in self.events.borrow().iter().rev() {
            if let CallbackEvent::Update { names, .. } = event {
                return names.clone();
            }
        }
        panic!("no full-state update recorded");
    }

    fn run_hook(&self) {
        if let Some(hook) = self.on_update_hook.borrow().as_ref() {
            hook();
        }
    }

    fn maybe_reject(&self) -> std::result::Result<(), UpdateRejection> {
        if self.reject_next.replace(false) {
            return Err(UpdateRejection::new("rejected by test"));
        }
        Ok(())
    }
}

impl SubscriptionCallbacks for RecordingCallbacks {
    fn on_config_update(
        &self,
        resources: &[DecodedResource],
        version_info: &str,
    ) -> std::result::Result<(), UpdateRejection> {
        self.events.borrow_mut().push(CallbackEvent::Update {
            names: resources.iter().map(|r| r.name().to_string()).collect(),
            version: version_info.to_string(),
        });
        self.run_hook();
        self.maybe_reject()
    }

    fn on_delta_config_update(
        &self,
        added: &[DecodedResource],
        removed: &[ResourceName],
        system_version_info: &str,
    ) -> std::result::Result<(), UpdateRejection> {
        self.events.borrow_mut().push(CallbackEvent::DeltaUpdate {
            added: added.iter().map(|r| r.name().to_string()).collect(),
            removed: removed.to_vec(),
            version: system_version_info.to_string(),
        });
        self.run_hook();
        self.maybe_reject()
    }

    fn on_config_update_failed(
        &self,
        reason: ConfigUpdateFailureReason,
        _detail: Option<&UpdateError>,
    ) {
        self.events
            .borrow_mut()
            .push(CallbackEvent::Failed { reason });
    }
}

/// Transport double that records every interest request. A `None` interest
/// is an unsubscribe-from-type request.
#[derive(Default)]
pub struct RecordingTransport {
    pub requests: RefCell<Vec<(String, Option<InterestSet>)>>,
}

impl RecordingTransport {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn last_interest(&self) -> Option<InterestSet> {
        self.requests
            .borrow()
            .last()
            .expect("no interest requests sent")
            .1
            .clone()
    }
}

impl SubscriptionTransport for RecordingTransport {
    fn set_interest(
        &self,
        type_url: &str,
        interest: &InterestSet,
    ) {
        self.requests
            .borrow_mut()
            .push((type_url.to_string(), Some(interest.clone())));
    }

    fn clear_interest(
        &self,
        type_url: &str,
    ) {
        self.requests.borrow_mut().push((type_url.to_string(), None));
    }
}

struct ManualTimerEntry {
    on_fire: Option<Box<dyn FnOnce()>>,
    cancelled: Rc<Cell<bool>>,
}

/// Timer factory fired explicitly by the test instead of by a clock.
#[derive(Default)]
pub struct ManualTimerFactory {
    armed: RefCell<Vec<ManualTimerEntry>>,
}

impl ManualTimerFactory {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Fires every armed, not-yet-cancelled timer.
    pub fn fire_all(&self) {
        let entries = std::mem::take(&mut *self.armed.borrow_mut());
        for mut entry in entries {
            if entry.cancelled.get() {
                continue;
            }
            if let Some(on_fire) = entry.on_fire.take() {
                on_fire();
            }
        }
    }

    pub fn armed_count(&self) -> usize {
        self.armed.borrow().len()
    }

    pub fn live_count(&self) -> usize {
        self.armed
            .borrow()
            .iter()
            .filter(|e| !e.cancelled.get())
            .count()
    }
}

impl TimerFactory for ManualTimerFactory {
    fn arm(
        &self,
        _after: Duration,
        on_fire: Box<dyn FnOnce()>,
    ) -> Box<dyn ArmedTimer> {
        let cancelled = Rc::new(Cell::new(false));
        self.armed.borrow_mut().push(ManualTimerEntry {
            on_fire: Some(on_fire),
            cancelled: Rc::clone(&cancelled),
        });
        Box::new(ManualArmedTimer { cancelled })
    }
}

struct ManualArmedTimer {
    cancelled: Rc<Cell<bool>>,
}

impl ArmedTimer for ManualArmedTimer {
    fn cancel(&self) {
        self.cancelled.set(true);
    }
}

impl Drop for ManualArmedTimer {
    fn drop(&mut self) {
        self.cancelled.set(true);
    }
}

/// Minimal endpoint payload whose name lives inside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEndpoint {
    pub cluster_name: String,
    pub address: String,
}

impl NamedPayload for TestEndpoint {
    fn resource_name(&self) -> String {
        self.cluster_name.clone()
    }
}

pub fn endpoint_decoder() -> Rc<BincodeDecoder<TestEndpoint>> {
    Rc::new(BincodeDecoder::new(TEST_TYPE_URL))
}

/// Raw endpoint resource named only through its payload, as on the
/// full-state wire.
pub fn raw_endpoint(
    name: &str,
    version: &str,
) -> RawResource {
    let payload = TestEndpoint {
        cluster_name: name.to_string(),
        address: format!("{name}.example.com:443"),
    };
    RawResource {
        name: String::new(),
        version: version.to_string(),
        aliases: Vec::new(),
        type_url: TEST_TYPE_URL.to_string(),
        payload: bincode::serialize(&payload).expect("serialize test payload"),
    }
}

/// Raw endpoint resource with explicit envelope naming and aliases, as on
/// the delta wire.
pub fn raw_endpoint_with_aliases(
    name: &str,
    aliases: &[&str],
    version: &str,
) -> RawResource {
    let mut raw = raw_endpoint(name, version);
    raw.name = name.to_string();
    raw.aliases = aliases.iter().map(|a| a.to_string()).collect();
    raw
}

/// Keyed route table used by the receiver tests. `Sub` entries are the
/// virtual hosts; an empty `name` fails validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRouteTable {
    pub name: String,
    pub vhosts: BTreeMap<String, String>,
}

impl TestRouteTable {
    pub fn new(
        name: &str,
        vhosts: &[(&str, &str)],
    ) -> Self {
        Self {
            name: name.to_string(),
            vhosts: vhosts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl ConfigSchema for TestRouteTable {
    type Sub = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("route table name must not be empty".to_string());
        }
        Ok(())
    }

    fn sub_entries(&self) -> Vec<(String, String)> {
        self.vhosts.clone().into_iter().collect()
    }

    fn with_sub_entries(
        &self,
        entries: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: self.name.clone(),
            vhosts: entries.clone(),
        }
    }
}
