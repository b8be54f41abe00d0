use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;

use crate::{
    component::{Component, ComponentSpec},
    dependency::Dependency,
    properties::Properties,
    task_queue::{TaskHandler, TaskQueue},
};

/// Identifies a component registered with an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Identifies one dependency entry of one component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(pub(crate) u64);

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency#{}", self.0)
    }
}

/// Boundary to the surrounding service registry. The engine publishes a
/// component's service when it becomes active and withdraws it on the way
/// down; discovery and delivery live outside this crate.
pub trait ServiceRegistry: Send + Sync {
    fn publish(&self, component: ComponentId, service: &str, properties: &Properties);
    fn unpublish(&self, component: ComponentId, service: &str);
}

/// One unit of work on the engine's queue.
pub(crate) enum EngineTask {
    AddComponent {
        component: Box<Component>,
    },
    RemoveComponent {
        component: ComponentId,
    },
    AddDependency {
        component: ComponentId,
        dependency: DependencyId,
        implementation: Arc<dyn Dependency>,
    },
    RemoveDependency {
        component: ComponentId,
        dependency: DependencyId,
    },
    DependencyChanged {
        component: ComponentId,
        dependency: DependencyId,
        available: bool,
    },
}

impl fmt::Display for EngineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddComponent { component } => write!(f, "register {}", component.label()),
            Self::RemoveComponent { component } => write!(f, "remove {component}"),
            Self::AddDependency {
                component,
                dependency,
                ..
            } => write!(f, "add {dependency} to {component}"),
            Self::RemoveDependency {
                component,
                dependency,
            } => write!(f, "remove {dependency} from {component}"),
            Self::DependencyChanged {
                component,
                dependency,
                available,
            } => {
                let direction = if *available { "available" } else { "unavailable" };
                write!(f, "{dependency} {direction} for {component}")
            }
        }
    }
}

/// The worker-owned side of the engine: the component table and the handler
/// that drains the queue. Nothing outside the worker ever touches a
/// [`Component`].
struct EngineState {
    label: String,
    components: HashMap<ComponentId, Component>,
}

#[async_trait]
impl TaskHandler for EngineState {
    type Task = EngineTask;

    async fn run(&mut self, task: EngineTask) {
        match task {
            EngineTask::AddComponent { component } => {
                let mut component = *component;
                tracing::info!("{}: registering {}", self.label, component.label());
                let id = component.id();
                component.start_tracking().await;
                self.components.insert(id, component);
            }
            EngineTask::RemoveComponent { component } => match self.components.remove(&component) {
                Some(mut removed) => removed.remove().await,
                None => tracing::warn!("{}: {component} is not registered", self.label),
            },
            EngineTask::AddDependency {
                component,
                dependency,
                implementation,
            } => match self.components.get_mut(&component) {
                Some(found) => found.add_dependency(dependency, implementation).await,
                None => tracing::warn!(
                    "{}: cannot add {dependency}, {component} is not registered",
                    self.label
                ),
            },
            EngineTask::RemoveDependency {
                component,
                dependency,
            } => match self.components.get_mut(&component) {
                Some(found) => found.remove_dependency(dependency).await,
                None => tracing::warn!(
                    "{}: cannot remove {dependency}, {component} is not registered",
                    self.label
                ),
            },
            EngineTask::DependencyChanged { component, .. } => {
                // the report only triggers a re-evaluation; availability is
                // re-read from the dependencies themselves
                match self.components.get_mut(&component) {
                    Some(found) => found.evaluate().await,
                    None => tracing::debug!(
                        "{}: availability report for unregistered {component}",
                        self.label
                    ),
                }
            }
        }
    }
}

/// Configuration for an [`Engine`].
pub struct EngineConfig {
    /// Names the engine and its worker in logs.
    pub label: String,
    /// Where active components publish their service, if anywhere.
    pub registry: Option<Arc<dyn ServiceRegistry>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label: "engine".into(),
            registry: None,
        }
    }
}

/// Activates and deactivates components as their dependencies come and go.
///
/// Every mutation of engine state runs as a task on one FIFO queue with a
/// single worker, so component transitions for one engine never interleave,
/// whatever thread or task the triggering event came from. The public methods
/// here enqueue and return; use [`Engine::settle`] to wait until everything
/// scheduled so far has been processed.
///
/// Must be created from within a tokio runtime.
pub struct Engine {
    label: String,
    queue: TaskQueue<EngineTask>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    next_component: AtomicU64,
    dependency_ids: Arc<AtomicU64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let state = EngineState {
            label: config.label.clone(),
            components: HashMap::new(),
        };
        Self {
            queue: TaskQueue::spawn(config.label.clone(), state),
            label: config.label,
            registry: config.registry,
            next_component: AtomicU64::new(1),
            dependency_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a component and starts tracking its dependencies. The
    /// returned id is usable immediately, even though activation happens
    /// asynchronously on the worker. Fails if the spec's controller install
    /// hook fails.
    pub fn add_component(&self, spec: ComponentSpec) -> anyhow::Result<ComponentId> {
        let id = ComponentId(self.next_component.fetch_add(1, Ordering::Relaxed));
        let component = Component::new(
            id,
            spec,
            self.queue.sender(),
            self.dependency_ids.clone(),
            self.registry.clone(),
        )?;
        self.queue.schedule(EngineTask::AddComponent {
            component: Box::new(component),
        })?;
        Ok(id)
    }

    /// Deactivates the component as far as its current state requires and
    /// forgets it.
    pub fn remove_component(&self, component: ComponentId) -> anyhow::Result<()> {
        self.queue
            .schedule(EngineTask::RemoveComponent { component })
    }

    /// Adds a dependency to a live component. A dependency added after the
    /// component instantiated is instance bound: losing it stops the
    /// component but does not destroy it.
    pub fn add_dependency<D: Dependency + 'static>(
        &self,
        component: ComponentId,
        dependency: Arc<D>,
    ) -> anyhow::Result<DependencyId> {
        let id = DependencyId(self.dependency_ids.fetch_add(1, Ordering::Relaxed));
        let implementation: Arc<dyn Dependency> = dependency;
        self.queue.schedule(EngineTask::AddDependency {
            component,
            dependency: id,
            implementation,
        })?;
        Ok(id)
    }

    /// Removes a previously added dependency, unbinding it first if its bind
    /// callback had fired.
    pub fn remove_dependency(
        &self,
        component: ComponentId,
        dependency: DependencyId,
    ) -> anyhow::Result<()> {
        self.queue.schedule(EngineTask::RemoveDependency {
            component,
            dependency,
        })
    }

    /// Completes once every task scheduled before this call has run. Each
    /// task runs its component transitions to completion before the next
    /// starts, so after this returns the engine reflects every event that
    /// preceded it.
    pub async fn settle(&self) {
        self.queue.barrier().await;
    }

    /// Drains the queue and stops the worker. Components are not deactivated;
    /// reports arriving afterwards are dropped with a debug log.
    pub async fn terminate(&self) {
        tracing::info!("{}: terminating", self.label);
        self.queue.terminate().await;
    }
}
