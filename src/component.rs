use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::Context;

use crate::{
    controller::Controller,
    dependency::{Dependency, DependencyTracker, Toggle, ToggleDependency},
    dispatcher::{Dispatcher, Lifecycle},
    engine::{ComponentId, DependencyId, EngineTask, ServiceRegistry},
    properties::{Properties, PropertyValue},
    short_name,
    task_queue::TaskSender,
};

/// Where a component stands between fully inactive and published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComponentState {
    /// No dependencies are being tracked.
    Inactive,
    /// Tracking has started and at least one required, non-instance-bound
    /// dependency is still unavailable. This is a normal steady state, not
    /// an error.
    WaitingForRequired,
    /// All required non-instance-bound dependencies are available and `init`
    /// has run; instance-bound requirements may still be pending.
    Instantiated,
    /// `start` has run; optional dependencies bind opportunistically.
    TrackingOptional,
    /// Stable while dependencies hold: the component's service, if any, is
    /// published.
    Active,
}

type ControllerInstall = Box<dyn FnOnce(Controller) -> anyhow::Result<()> + Send>;

/// Everything needed to register a component: its composition instances, its
/// ordered dependency list, and optional service and controller
/// configuration.
#[derive(Default)]
pub struct ComponentSpec {
    label: Option<String>,
    composition: Vec<Arc<dyn Lifecycle>>,
    dependencies: Vec<Arc<dyn Dependency>>,
    service: Option<String>,
    properties: Properties,
    controller: Option<ControllerInstall>,
}

impl ComponentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The implementation instance, or an additional composition instance.
    /// Every instance receives every lifecycle callback, in the order the
    /// instances were added.
    pub fn instance<L: Lifecycle + 'static>(mut self, instance: Arc<L>) -> Self {
        if self.label.is_none() {
            self.label = Some(short_name::<L>());
        }
        self.composition.push(instance);
        self
    }

    /// Appends a dependency. Insertion order determines injection and
    /// callback sequencing. Named dependencies are deferred until after
    /// `init` so the customization map can be applied to them.
    pub fn dependency<D: Dependency + 'static>(mut self, dependency: Arc<D>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// The service name this component publishes while active.
    pub fn provides(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// A base published property. Start-callback extras and propagated
    /// dependency properties are merged on top at publication time.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Overrides the diagnostic label, which otherwise defaults to the first
    /// instance's type name.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Configures a lifecycle controller. `install` receives the handle pair
    /// before any lifecycle callback runs; if it fails, registration fails.
    pub fn controller(
        mut self,
        install: impl FnOnce(Controller) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.controller = Some(Box::new(install));
        self
    }
}

struct DependencyEntry {
    id: DependencyId,
    dependency: Arc<dyn Dependency>,
    /// Added after the init-phase customization step. Exempt from the
    /// pre-instantiation required check, and its loss stops but does not
    /// destroy the component.
    instance_bound: bool,
    /// Built during `instantiate`, torn down when the cycle is destroyed.
    from_init: bool,
    /// Built from a named template; the instance-bound flag is cleared once
    /// `start` completes.
    clear_after_start: bool,
    /// The engine's own controller toggle: gates availability but produces
    /// no bind callbacks.
    hidden: bool,
    tracking: bool,
    bound: bool,
}

impl DependencyEntry {
    fn new(id: DependencyId, dependency: Arc<dyn Dependency>) -> Self {
        Self {
            id,
            dependency,
            instance_bound: false,
            from_init: false,
            clear_after_start: false,
            hidden: false,
            tracking: false,
            bound: false,
        }
    }
}

/// The lifecycle state machine for one component.
///
/// Owned exclusively by the engine's worker: every method here runs inside a
/// queued task, so a full re-evaluation is never interleaved with another
/// event for the same engine.
pub(crate) struct Component {
    id: ComponentId,
    label: String,
    state: ComponentState,
    dispatcher: Dispatcher,
    entries: Vec<DependencyEntry>,
    named_templates: Vec<Arc<dyn Dependency>>,
    controller: Option<Controller>,
    service: Option<String>,
    base_properties: Properties,
    extra_properties: Properties,
    /// Required binds in order, unwound in reverse on stop.
    bind_order: Vec<DependencyId>,
    queue: TaskSender<EngineTask>,
    ids: Arc<AtomicU64>,
    registry: Option<Arc<dyn ServiceRegistry>>,
}

impl Component {
    pub fn new(
        id: ComponentId,
        spec: ComponentSpec,
        queue: TaskSender<EngineTask>,
        ids: Arc<AtomicU64>,
        registry: Option<Arc<dyn ServiceRegistry>>,
    ) -> anyhow::Result<Self> {
        let name = spec.label.unwrap_or_else(|| "anonymous".into());
        let label = format!("{id} ({name})");

        let controller = match spec.controller {
            Some(install) => {
                let toggle = Arc::new(Toggle::new());
                let controller = Controller::new(toggle.clone(), label.clone());
                install(controller.clone()).with_context(|| {
                    format!("failed to install lifecycle controller for {label}")
                })?;
                Some(controller)
            }
            None => None,
        };

        let mut named_templates = vec![];
        let mut entries = vec![];
        for dependency in spec.dependencies {
            if dependency.name().is_some() {
                named_templates.push(dependency);
            } else {
                let id = DependencyId(ids.fetch_add(1, Ordering::Relaxed));
                entries.push(DependencyEntry::new(id, dependency));
            }
        }

        Ok(Self {
            id,
            dispatcher: Dispatcher::new(label.clone(), spec.composition),
            label,
            state: ComponentState::Inactive,
            entries,
            named_templates,
            controller,
            service: spec.service,
            base_properties: spec.properties,
            extra_properties: Properties::new(),
            bind_order: vec![],
            queue,
            ids,
            registry,
        })
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Begins tracking the statically declared dependencies and evaluates.
    /// A component with no unsatisfied requirements runs all the way to
    /// `Active` before this returns.
    pub async fn start_tracking(&mut self) {
        self.set_state(ComponentState::WaitingForRequired);
        for entry in &mut self.entries {
            Self::track_entry(&self.queue, self.id, entry);
        }
        self.evaluate().await;
    }

    /// One full pass of the state machine. The whole required set is
    /// recomputed from current availability on every call, so out-of-order
    /// or repeated reports are harmless.
    pub async fn evaluate(&mut self) {
        self.sync_optional_bindings().await;
        loop {
            match self.state {
                ComponentState::Inactive => break,
                ComponentState::WaitingForRequired => {
                    if self.base_required_satisfied() {
                        self.instantiate().await;
                    } else {
                        break;
                    }
                }
                ComponentState::Instantiated => {
                    if !self.base_required_satisfied() {
                        self.destroy().await;
                    } else if self.instance_bound_required_satisfied() {
                        self.start().await;
                    } else {
                        break;
                    }
                }
                ComponentState::TrackingOptional => {
                    self.publish();
                    self.set_state(ComponentState::Active);
                }
                ComponentState::Active => {
                    if !self.base_required_satisfied() || !self.instance_bound_required_satisfied()
                    {
                        self.stop().await;
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Adds a dependency to the live component.
    pub async fn add_dependency(&mut self, id: DependencyId, dependency: Arc<dyn Dependency>) {
        // added after init means instance bound: it cannot gate
        // instantiation, and losing it stops but does not destroy
        let mut entry = DependencyEntry::new(id, dependency);
        entry.instance_bound = self.state >= ComponentState::Instantiated;
        if self.state != ComponentState::Inactive {
            Self::track_entry(&self.queue, self.id, &mut entry);
        }
        self.entries.push(entry);
        self.evaluate().await;
    }

    /// Removes a dependency from the live component, unbinding it first if a
    /// bind callback had fired.
    pub async fn remove_dependency(&mut self, id: DependencyId) {
        let Some(idx) = self.entries.iter().position(|e| e.id == id) else {
            tracing::warn!("{}: no dependency {id} to remove", self.label);
            return;
        };
        if self.entries[idx].bound {
            self.unbind_entry(idx).await;
        }
        let entry = self.entries.remove(idx);
        if entry.tracking {
            entry
                .dependency
                .stop(&DependencyTracker::new(self.id, entry.id, self.queue.clone()));
        }
        self.evaluate().await;
    }

    /// Full teardown: deactivates as far as the current cycle requires, then
    /// stops tracking everything.
    pub async fn remove(&mut self) {
        if self.state > ComponentState::Instantiated {
            self.stop().await;
        }
        if self.state == ComponentState::Instantiated {
            self.destroy().await;
        }
        for idx in 0..self.entries.len() {
            if self.entries[idx].bound {
                self.unbind_entry(idx).await;
            }
        }
        for entry in &mut self.entries {
            if entry.tracking {
                entry.tracking = false;
                entry
                    .dependency
                    .stop(&DependencyTracker::new(self.id, entry.id, self.queue.clone()));
            }
        }
        self.set_state(ComponentState::Inactive);
        tracing::info!("{}: removed", self.label);
    }

    /// `WaitingForRequired` to `Instantiated`: run `init`, then build the
    /// named dependencies with the returned customization applied.
    async fn instantiate(&mut self) {
        tracing::info!("{}: instantiating", self.label);
        self.set_state(ComponentState::Instantiated);

        if let Some(controller) = &self.controller {
            // gates start until the component's own code activates it
            let dependency: Arc<dyn Dependency> =
                Arc::new(ToggleDependency::new(controller.toggle().clone(), true));
            let mut entry = DependencyEntry::new(self.allocate_id(), dependency);
            entry.instance_bound = true;
            entry.from_init = true;
            entry.hidden = true;
            Self::track_entry(&self.queue, self.id, &mut entry);
            self.entries.push(entry);
        }

        let customization = self.dispatcher.init().await;
        if !customization.is_empty() {
            tracing::debug!("{}: init returned customization {customization:?}", self.label);
            for name in customization.referenced_names() {
                let known = self
                    .named_templates
                    .iter()
                    .any(|t| t.name() == Some(name.as_str()));
                if !known {
                    tracing::warn!(
                        "{}: init customization references unknown dependency '{name}'",
                        self.label
                    );
                }
            }
        }

        let mut built: Vec<Arc<dyn Dependency>> = vec![];
        for template in &self.named_templates {
            let Some(name) = template.name() else {
                continue;
            };
            let filter = customization.filter_for(name);
            let required = customization.required_for(name);
            let dependency = if filter.is_some() || required.is_some() {
                template.customize(filter, required)
            } else {
                template.create_copy()
            };
            built.push(dependency);
        }
        for dependency in built {
            let mut entry = DependencyEntry::new(self.allocate_id(), dependency);
            entry.instance_bound = true;
            entry.from_init = true;
            entry.clear_after_start = true;
            Self::track_entry(&self.queue, self.id, &mut entry);
            self.entries.push(entry);
        }
    }

    /// `Instantiated` to `TrackingOptional`: bind required dependencies in
    /// insertion order, run `start`, merge its extra properties, and clear
    /// the instance-bound flag on init-added dependencies.
    async fn start(&mut self) {
        for idx in 0..self.entries.len() {
            let ready = {
                let entry = &self.entries[idx];
                entry.dependency.is_required()
                    && !entry.hidden
                    && !entry.bound
                    && entry.dependency.is_available()
            };
            if ready {
                self.bind_entry(idx, true).await;
            }
        }

        let extra = self.dispatcher.start().await;
        self.extra_properties = extra;

        // losing a dependency customized during init must deactivate us from
        // now on
        for entry in &mut self.entries {
            if entry.clear_after_start {
                entry.instance_bound = false;
            }
        }

        tracing::info!("{}: started", self.label);
        self.set_state(ComponentState::TrackingOptional);
    }

    /// `Active` back to `Instantiated`: withdraw the service, run `stop`,
    /// and unbind required dependencies in reverse bind order.
    async fn stop(&mut self) {
        tracing::info!("{}: stopping", self.label);
        self.unpublish();
        self.dispatcher.stop().await;
        while let Some(id) = self.bind_order.pop() {
            // the entry may have been removed already
            if let Some(idx) = self.entries.iter().position(|e| e.id == id) {
                let dependency = {
                    let entry = &mut self.entries[idx];
                    entry.bound = false;
                    entry.dependency.clone()
                };
                self.dispatcher
                    .unbound(dependency.name(), bind_value(&dependency))
                    .await;
            }
        }
        self.extra_properties.clear();
        self.set_state(ComponentState::Instantiated);
    }

    /// `Instantiated` back to `WaitingForRequired`: tear down the
    /// dependencies built for this cycle, then run `destroy`.
    async fn destroy(&mut self) {
        let mut kept = vec![];
        let mut removed = vec![];
        for entry in self.entries.drain(..) {
            if entry.from_init {
                removed.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        for entry in removed {
            self.bind_order.retain(|id| *id != entry.id);
            if entry.bound && !entry.hidden {
                self.dispatcher
                    .unbound(entry.dependency.name(), bind_value(&entry.dependency))
                    .await;
            }
            if entry.tracking {
                entry
                    .dependency
                    .stop(&DependencyTracker::new(self.id, entry.id, self.queue.clone()));
            }
        }
        self.dispatcher.destroy().await;
        tracing::info!("{}: destroyed", self.label);
        self.set_state(ComponentState::WaitingForRequired);
    }

    /// Optional dependencies never gate activation; their callbacks fire on
    /// availability edges from the moment tracking starts.
    async fn sync_optional_bindings(&mut self) {
        if self.state == ComponentState::Inactive {
            return;
        }
        for idx in 0..self.entries.len() {
            let (eligible, bound, available) = {
                let entry = &self.entries[idx];
                (
                    !entry.dependency.is_required() && entry.tracking && !entry.hidden,
                    entry.bound,
                    entry.dependency.is_available(),
                )
            };
            if !eligible {
                continue;
            }
            if available && !bound {
                self.bind_entry(idx, false).await;
            } else if !available && bound {
                self.unbind_entry(idx).await;
            }
        }
    }

    async fn bind_entry(&mut self, idx: usize, record_order: bool) {
        let (dependency, id) = {
            let entry = &mut self.entries[idx];
            entry.bound = true;
            (entry.dependency.clone(), entry.id)
        };
        if record_order {
            self.bind_order.push(id);
        }
        self.dispatcher
            .bound(dependency.name(), bind_value(&dependency))
            .await;
    }

    async fn unbind_entry(&mut self, idx: usize) {
        let (dependency, id) = {
            let entry = &mut self.entries[idx];
            entry.bound = false;
            (entry.dependency.clone(), entry.id)
        };
        self.bind_order.retain(|i| *i != id);
        self.dispatcher
            .unbound(dependency.name(), bind_value(&dependency))
            .await;
    }

    fn base_required_satisfied(&self) -> bool {
        self.entries
            .iter()
            .filter(|e| e.dependency.is_required() && !e.instance_bound)
            .all(|e| e.dependency.is_available())
    }

    fn instance_bound_required_satisfied(&self) -> bool {
        self.entries
            .iter()
            .filter(|e| e.dependency.is_required() && e.instance_bound)
            .all(|e| e.dependency.is_available())
    }

    fn publish(&mut self) {
        if let (Some(service), Some(registry)) = (&self.service, &self.registry) {
            let properties = self.published_properties();
            registry.publish(self.id, service, &properties);
            tracing::info!("{}: published service {service}", self.label);
        }
        tracing::info!("{}: active", self.label);
    }

    fn unpublish(&mut self) {
        if let (Some(service), Some(registry)) = (&self.service, &self.registry) {
            registry.unpublish(self.id, service);
            tracing::info!("{}: withdrew service {service}", self.label);
        }
    }

    fn published_properties(&self) -> Properties {
        let mut properties = self.base_properties.clone();
        for entry in &self.entries {
            if entry.dependency.is_propagated() && entry.dependency.is_available() {
                if let Some(extra) = entry.dependency.properties() {
                    properties.extend(extra);
                }
            }
        }
        // properties returned by start callbacks take precedence
        properties.extend(self.extra_properties.clone());
        properties
    }

    fn allocate_id(&self) -> DependencyId {
        DependencyId(self.ids.fetch_add(1, Ordering::Relaxed))
    }

    fn track_entry(
        queue: &TaskSender<EngineTask>,
        component: ComponentId,
        entry: &mut DependencyEntry,
    ) {
        if !entry.tracking {
            entry.tracking = true;
            entry
                .dependency
                .start(DependencyTracker::new(component, entry.id, queue.clone()));
        }
    }

    fn set_state(&mut self, state: ComponentState) {
        if self.state != state {
            tracing::debug!("{}: {:?} -> {:?}", self.label, self.state, state);
            self.state = state;
        }
    }
}

fn bind_value(dependency: &Arc<dyn Dependency>) -> Option<PropertyValue> {
    if dependency.is_auto_config() {
        dependency.auto_config_value()
    } else {
        None
    }
}
