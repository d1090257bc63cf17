use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::config::SubscriptionConfig;
use crate::test_utils::{ManualTimerFactory, RecordingCallbacks, RecordingTransport, TestEndpoint};
use crate::{BincodeDecoder, Error, Mux, SubscriptionFactory, SubscriptionTransport, TransportBinding};

struct TestBinding {
    transport: Rc<RecordingTransport>,
    created: Cell<usize>,
}

impl TransportBinding for TestBinding {
    fn create_mux(&self) -> Rc<Mux> {
        self.created.set(self.created.get() + 1);
        Mux::new(Rc::clone(&self.transport) as Rc<dyn SubscriptionTransport>)
    }
}

fn factory_with(
    binding_name: &str,
    binding: Rc<TestBinding>,
) -> SubscriptionFactory {
    let mut bindings: HashMap<String, Rc<dyn TransportBinding>> = HashMap::new();
    bindings.insert(binding_name.to_string(), binding);
    SubscriptionFactory::new(
        bindings,
        ManualTimerFactory::new(),
        SubscriptionConfig {
            transport_binding: binding_name.to_string(),
            init_fetch_timeout_in_ms: 0,
        },
    )
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_unknown_binding_is_a_config_error() {
    let binding = Rc::new(TestBinding {
        transport: RecordingTransport::new(),
        created: Cell::new(0),
    });
    let factory = factory_with("primary", binding);

    let result = factory.subscription_from_binding(
        "missing",
        "factory.v1.Unknown",
        RecordingCallbacks::new(),
        Rc::new(BincodeDecoder::<TestEndpoint>::new("factory.v1.Unknown")),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_subscriptions_on_one_binding_share_a_mux() {
    let binding = Rc::new(TestBinding {
        transport: RecordingTransport::new(),
        created: Cell::new(0),
    });
    let transport = Rc::clone(&binding.transport);
    let factory = factory_with("primary", Rc::clone(&binding));

    let listeners = factory
        .subscription_from_binding(
            "primary",
            "factory.v1.Listener",
            RecordingCallbacks::new(),
            Rc::new(BincodeDecoder::<TestEndpoint>::new("factory.v1.Listener")),
        )
        .unwrap();
    let clusters = factory
        .subscription_from_binding(
            "primary",
            "factory.v1.Cluster",
            RecordingCallbacks::new(),
            Rc::new(BincodeDecoder::<TestEndpoint>::new("factory.v1.Cluster")),
        )
        .unwrap();

    assert_eq!(binding.created.get(), 1);
    listeners.start(names(&["l1"]));
    clusters.start(names(&["c1"]));
    // Both types reached the single shared transport.
    let urls: Vec<String> = transport
        .requests
        .borrow()
        .iter()
        .map(|(url, _)| url.clone())
        .collect();
    assert_eq!(urls, vec!["factory.v1.Listener", "factory.v1.Cluster"]);
}

#[test]
fn test_default_binding_is_used_when_unnamed() {
    let binding = Rc::new(TestBinding {
        transport: RecordingTransport::new(),
        created: Cell::new(0),
    });
    let factory = factory_with("primary", Rc::clone(&binding));

    let facade = factory
        .subscription(
            "factory.v1.Default",
            RecordingCallbacks::new(),
            Rc::new(BincodeDecoder::<TestEndpoint>::new("factory.v1.Default")),
        )
        .unwrap();
    facade.start(names(&["r1"]));
    assert_eq!(binding.created.get(), 1);
}
