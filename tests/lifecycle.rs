//! End-to-end scenarios driving components through activation and
//! deactivation via the public engine API.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use dep_frame::{
    component::ComponentSpec,
    controller::Controller,
    dependency::{Dependency, DependencyTracker, Toggle, ToggleDependency},
    dispatcher::Lifecycle,
    engine::{ComponentId, Engine, EngineConfig, ServiceRegistry},
    properties::{Customization, Properties, PropertyValue},
};

/// Shared ordered record of lifecycle callbacks across all composition
/// instances of a test.
#[derive(Clone, Default)]
struct StepLog(Arc<Mutex<Vec<String>>>);

impl StepLog {
    fn record(&self, step: String) {
        self.0.lock().push(step);
    }

    fn steps(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn count(&self, step: &str) -> usize {
        self.0.lock().iter().filter(|s| *s == step).count()
    }
}

/// A lifecycle implementation that records every callback it receives and
/// can be configured to customize dependencies, contribute start properties,
/// or fail selected callbacks.
#[derive(Default)]
struct Probe {
    prefix: Option<String>,
    log: StepLog,
    customization: Customization,
    start_properties: Properties,
    fail_init: bool,
    fail_start: bool,
}

impl Probe {
    fn new(log: &StepLog) -> Self {
        Self {
            log: log.clone(),
            ..Default::default()
        }
    }

    fn prefixed(log: &StepLog, prefix: &str) -> Self {
        Self {
            prefix: Some(prefix.into()),
            log: log.clone(),
            ..Default::default()
        }
    }

    fn with_customization(mut self, customization: Customization) -> Self {
        self.customization = customization;
        self
    }

    fn with_start_properties(mut self, properties: Properties) -> Self {
        self.start_properties = properties;
        self
    }

    fn record(&self, step: &str) {
        match &self.prefix {
            Some(prefix) => self.log.record(format!("{prefix}:{step}")),
            None => self.log.record(step.to_string()),
        }
    }
}

#[async_trait]
impl Lifecycle for Probe {
    async fn init(&self) -> anyhow::Result<Customization> {
        self.record("init");
        if self.fail_init {
            anyhow::bail!("init failed on purpose");
        }
        Ok(self.customization.clone())
    }

    async fn start(&self) -> anyhow::Result<Properties> {
        self.record("start");
        if self.fail_start {
            anyhow::bail!("start failed on purpose");
        }
        Ok(self.start_properties.clone())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.record("stop");
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.record("destroy");
        Ok(())
    }

    async fn dependency_bound(
        &self,
        name: Option<&str>,
        _value: Option<PropertyValue>,
    ) -> anyhow::Result<()> {
        match name {
            Some(name) => self.record(&format!("bound:{name}")),
            None => self.record("bound"),
        }
        Ok(())
    }

    async fn dependency_unbound(
        &self,
        name: Option<&str>,
        _value: Option<PropertyValue>,
    ) -> anyhow::Result<()> {
        match name {
            Some(name) => self.record(&format!("unbound:{name}")),
            None => self.record("unbound"),
        }
        Ok(())
    }
}

/// Captures publish and unpublish calls in order.
#[derive(Default)]
struct RecordingRegistry {
    events: Mutex<Vec<(String, String, Option<Properties>)>>,
}

impl RecordingRegistry {
    fn events(&self) -> Vec<(String, String, Option<Properties>)> {
        self.events.lock().clone()
    }

    fn publish_count(&self) -> usize {
        self.events.lock().iter().filter(|e| e.0 == "publish").count()
    }
}

impl ServiceRegistry for RecordingRegistry {
    fn publish(&self, _component: ComponentId, service: &str, properties: &Properties) {
        self.events
            .lock()
            .push(("publish".into(), service.into(), Some(properties.clone())));
    }

    fn unpublish(&self, _component: ComponentId, service: &str) {
        self.events.lock().push(("unpublish".into(), service.into(), None));
    }
}

/// A hand-rolled signal source implementing [`Dependency`] directly, the way
/// an adapter for an external event source would. Unlike [`Toggle`] it can
/// re-announce its current state without an actual change, and it can carry
/// propagated properties.
#[derive(Default)]
struct Signal {
    available: AtomicBool,
    trackers: Mutex<Vec<DependencyTracker>>,
}

impl Signal {
    fn set(&self, available: bool) {
        if self.available.swap(available, Ordering::SeqCst) == available {
            return;
        }
        self.announce(available);
    }

    /// Reports the current state again even though nothing changed.
    fn reannounce(&self) {
        self.announce(self.available.load(Ordering::SeqCst));
    }

    fn announce(&self, available: bool) {
        let trackers: Vec<DependencyTracker> = self.trackers.lock().clone();
        for tracker in trackers {
            if available {
                tracker.dependency_available();
            } else {
                tracker.dependency_unavailable();
            }
        }
    }
}

struct SignalDependency {
    signal: Arc<Signal>,
    required: bool,
    propagated: Option<Properties>,
}

impl SignalDependency {
    fn new(signal: Arc<Signal>, required: bool) -> Self {
        Self {
            signal,
            required,
            propagated: None,
        }
    }

    fn propagating(signal: Arc<Signal>, required: bool, properties: Properties) -> Self {
        Self {
            signal,
            required,
            propagated: Some(properties),
        }
    }
}

impl Dependency for SignalDependency {
    fn is_required(&self) -> bool {
        self.required
    }

    fn is_available(&self) -> bool {
        self.signal.available.load(Ordering::SeqCst)
    }

    fn is_propagated(&self) -> bool {
        self.propagated.is_some()
    }

    fn properties(&self) -> Option<Properties> {
        self.propagated.clone()
    }

    fn create_copy(&self) -> Arc<dyn Dependency> {
        Arc::new(Self {
            signal: self.signal.clone(),
            required: self.required,
            propagated: self.propagated.clone(),
        })
    }

    fn start(&self, tracker: DependencyTracker) {
        self.signal.trackers.lock().push(tracker);
    }

    fn stop(&self, tracker: &DependencyTracker) {
        self.signal.trackers.lock().retain(|t| t != tracker);
    }
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default())
}

fn engine_with_registry() -> (Engine, Arc<RecordingRegistry>) {
    let registry = Arc::new(RecordingRegistry::default());
    let engine = Engine::new(EngineConfig {
        registry: Some(registry.clone()),
        ..Default::default()
    });
    (engine, registry)
}

#[tokio::test]
async fn component_without_dependencies_activates_immediately() {
    let (engine, registry) = engine_with_registry();
    let log = StepLog::default();

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .provides("cache")
                .property("region", "us-east"),
        )
        .unwrap();
    engine.settle().await;

    assert_eq!(log.steps(), vec!["init", "start"]);
    let events = registry.events();
    assert_eq!(events.len(), 1);
    let (kind, service, properties) = &events[0];
    assert_eq!(kind, "publish");
    assert_eq!(service, "cache");
    assert_eq!(
        properties.as_ref().unwrap().get("region"),
        Some(&PropertyValue::Str("us-east".into()))
    );
    engine.terminate().await;
}

#[tokio::test]
async fn required_dependency_gates_activation() {
    let engine = engine();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::new(toggle.clone(), true))),
        )
        .unwrap();
    engine.settle().await;
    assert!(log.steps().is_empty());

    toggle.set_available(true);
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "bound", "start"]);
    engine.terminate().await;
}

#[tokio::test]
async fn availability_flips_walk_the_full_ladder_in_order() {
    let engine = engine();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::new(toggle.clone(), true))),
        )
        .unwrap();
    engine.settle().await;

    // three flips in a row, settled once: each queued report still runs its
    // transitions to completion before the next
    toggle.set_available(true);
    toggle.set_available(false);
    toggle.set_available(true);
    engine.settle().await;

    assert_eq!(
        log.steps(),
        vec!["init", "bound", "start", "stop", "unbound", "destroy", "init", "bound", "start"]
    );
    assert_eq!(log.count("init"), log.count("destroy") + 1);
    engine.terminate().await;
}

#[tokio::test]
async fn repeated_reports_without_change_cause_no_callbacks() {
    let engine = engine();
    let log = StepLog::default();
    let signal = Arc::new(Signal::default());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(SignalDependency::new(signal.clone(), true))),
        )
        .unwrap();
    signal.set(true);
    engine.settle().await;
    let after_activation = log.steps();

    signal.reannounce();
    signal.reannounce();
    engine.settle().await;

    assert_eq!(log.steps(), after_activation);
    engine.terminate().await;
}

#[tokio::test]
async fn optional_dependency_binds_without_gating() {
    let (engine, registry) = engine_with_registry();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::new(toggle.clone(), false)))
                .provides("reporting"),
        )
        .unwrap();
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "start"]);

    toggle.set_available(true);
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "start", "bound"]);

    toggle.set_available(false);
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "start", "bound", "unbound"]);

    // the component never left the active state
    assert_eq!(registry.publish_count(), 1);
    engine.terminate().await;
}

#[tokio::test]
async fn dependency_added_to_active_component_stops_but_does_not_destroy() {
    let engine = engine();
    let log = StepLog::default();
    let gate = Arc::new(Toggle::new());
    gate.set_available(true);
    let late = Arc::new(Toggle::new());

    let component = engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::new(gate.clone(), true))),
        )
        .unwrap();
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "bound", "start"]);

    engine
        .add_dependency(component, Arc::new(ToggleDependency::new(late.clone(), true)))
        .unwrap();
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "bound", "start", "stop", "unbound"]);
    assert_eq!(log.count("destroy"), 0);

    late.set_available(true);
    engine.settle().await;
    assert_eq!(log.count("init"), 1);
    assert_eq!(log.count("start"), 2);
    engine.terminate().await;
}

#[tokio::test]
async fn removing_a_dependency_unbinds_and_reevaluates() {
    let engine = engine();
    let log = StepLog::default();
    let gate = Arc::new(Toggle::new());
    gate.set_available(true);
    let late = Arc::new(Toggle::new());

    let component = engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::new(gate.clone(), true))),
        )
        .unwrap();
    let blocker = engine
        .add_dependency(component, Arc::new(ToggleDependency::new(late, true)))
        .unwrap();
    engine.settle().await;
    // activation, then a stop forced by the unavailable late dependency
    assert_eq!(log.steps(), vec!["init", "bound", "start", "stop", "unbound"]);

    engine.remove_dependency(component, blocker).unwrap();
    engine.settle().await;
    assert_eq!(log.count("start"), 2);
    assert_eq!(log.count("destroy"), 0);
    engine.terminate().await;
}

#[tokio::test]
async fn named_dependency_is_built_after_init_and_torn_down_per_cycle() {
    let engine = engine();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::named(
                    toggle.clone(),
                    "storage",
                    true,
                ))),
        )
        .unwrap();
    engine.settle().await;
    // init ran even though storage is down: named dependencies never gate
    // instantiation, only start
    assert_eq!(log.steps(), vec!["init"]);

    toggle.set_available(true);
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "bound:storage", "start"]);

    // after start the dependency counts like a statically declared one, so
    // losing it destroys the cycle, and a fresh cycle begins immediately
    toggle.set_available(false);
    engine.settle().await;
    assert_eq!(
        log.steps(),
        vec!["init", "bound:storage", "start", "stop", "unbound:storage", "destroy", "init"]
    );

    toggle.set_available(true);
    engine.settle().await;
    assert_eq!(log.count("start"), 2);
    engine.terminate().await;
}

#[tokio::test]
async fn init_customization_can_demote_a_named_dependency_to_optional() {
    let engine = engine();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());
    let mut customization = Customization::new();
    customization.set("storage.required", false);

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log).with_customization(customization)))
                .dependency(Arc::new(ToggleDependency::named(
                    toggle.clone(),
                    "storage",
                    true,
                ))),
        )
        .unwrap();
    engine.settle().await;
    // the override made storage optional, so start was not gated on it
    assert_eq!(log.steps(), vec!["init", "start"]);

    toggle.set_available(true);
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "start", "bound:storage"]);
    engine.terminate().await;
}

#[tokio::test]
async fn malformed_customization_keeps_the_declared_attributes() {
    let engine = engine();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());
    let mut customization = Customization::new();
    customization.set("storage.required", "maybe");

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log).with_customization(customization)))
                .dependency(Arc::new(ToggleDependency::named(toggle, "storage", true))),
        )
        .unwrap();
    engine.settle().await;

    // the malformed override was ignored: storage is still required and down
    assert_eq!(log.steps(), vec!["init"]);
    engine.terminate().await;
}

#[tokio::test]
async fn published_properties_merge_base_propagated_and_start_extras() {
    let (engine, registry) = engine_with_registry();
    let log = StepLog::default();
    let signal = Arc::new(Signal::default());
    signal.set(true);
    let mut extras = Properties::new();
    extras.insert("region".into(), "eu-west".into());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log).with_start_properties(extras)))
                .dependency(Arc::new(SignalDependency::propagating(
                    signal,
                    true,
                    Properties::from([("tier".into(), PropertyValue::Str("hot".into()))]),
                )))
                .provides("cache")
                .property("region", "us-east")
                .property("capacity", 512i64),
        )
        .unwrap();
    engine.settle().await;

    let events = registry.events();
    assert_eq!(events.len(), 1);
    let properties = events[0].2.as_ref().unwrap();
    // start extras win over the base value
    assert_eq!(properties.get("region"), Some(&PropertyValue::Str("eu-west".into())));
    assert_eq!(properties.get("tier"), Some(&PropertyValue::Str("hot".into())));
    assert_eq!(properties.get("capacity"), Some(&PropertyValue::Int(512)));
    engine.terminate().await;
}

#[tokio::test]
async fn controller_gates_start_and_is_idempotent() {
    let engine = engine();
    let log = StepLog::default();
    let handle: Arc<Mutex<Option<Controller>>> = Arc::new(Mutex::new(None));
    let install_target = handle.clone();

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .controller(move |controller| {
                    *install_target.lock() = Some(controller);
                    Ok(())
                }),
        )
        .unwrap();
    engine.settle().await;
    // init ran, but start waits for the controller
    assert_eq!(log.steps(), vec!["init"]);

    let controller = handle.lock().clone().unwrap();
    controller.activate();
    controller.activate();
    engine.settle().await;
    assert_eq!(log.steps(), vec!["init", "start"]);

    controller.deactivate();
    engine.settle().await;
    // deactivation stops the component but keeps the cycle alive
    assert_eq!(log.steps(), vec!["init", "start", "stop"]);
    assert_eq!(log.count("destroy"), 0);

    controller.activate();
    engine.settle().await;
    assert_eq!(log.count("start"), 2);
    assert_eq!(log.count("init"), 1);
    engine.terminate().await;
}

#[tokio::test]
async fn failing_controller_install_fails_registration() {
    let engine = engine();
    let result = engine.add_component(
        ComponentSpec::new()
            .instance(Arc::new(Probe::new(&StepLog::default())))
            .controller(|_| anyhow::bail!("no slot available for the controller")),
    );
    assert!(result.is_err());
    engine.terminate().await;
}

#[tokio::test]
async fn composition_instances_receive_callbacks_in_order() {
    let engine = engine();
    let log = StepLog::default();

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::prefixed(&log, "a")))
                .instance(Arc::new(Probe::prefixed(&log, "b"))),
        )
        .unwrap();
    engine.settle().await;

    assert_eq!(log.steps(), vec!["a:init", "b:init", "a:start", "b:start"]);
    engine.terminate().await;
}

#[tokio::test]
async fn callback_failures_are_isolated_from_other_instances() {
    let (engine, registry) = engine_with_registry();
    let log = StepLog::default();
    let failing = Probe {
        fail_init: true,
        fail_start: true,
        ..Probe::prefixed(&log, "a")
    };

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(failing))
                .instance(Arc::new(Probe::prefixed(&log, "b")))
                .provides("api"),
        )
        .unwrap();
    engine.settle().await;

    // a's failures were logged and skipped; b ran and the component went up
    assert_eq!(log.steps(), vec!["a:init", "b:init", "a:start", "b:start"]);
    assert_eq!(registry.publish_count(), 1);
    engine.terminate().await;
}

#[tokio::test]
async fn removing_a_component_deactivates_and_unpublishes() {
    let (engine, registry) = engine_with_registry();
    let log = StepLog::default();

    let component = engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .provides("cache"),
        )
        .unwrap();
    engine.settle().await;
    assert_eq!(registry.publish_count(), 1);

    engine.remove_component(component).unwrap();
    engine.settle().await;

    assert_eq!(log.steps(), vec!["init", "start", "stop", "destroy"]);
    let events = registry.events();
    assert_eq!(events.last().unwrap().0, "unpublish");
    engine.terminate().await;
}

#[tokio::test]
async fn terminate_drops_late_reports_without_panicking() {
    let engine = engine();
    let log = StepLog::default();
    let toggle = Arc::new(Toggle::new());

    engine
        .add_component(
            ComponentSpec::new()
                .instance(Arc::new(Probe::new(&log)))
                .dependency(Arc::new(ToggleDependency::new(toggle.clone(), true))),
        )
        .unwrap();
    engine.settle().await;
    engine.terminate().await;

    // the report has nowhere to go; it is logged and dropped
    toggle.set_available(true);
    assert!(log.steps().is_empty());
}
