use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    engine::{ComponentId, DependencyId, EngineTask},
    properties::{Properties, PropertyValue},
    task_queue::TaskSender,
};

/// One thing a component needs: another service, a configuration object, a
/// resource, or a custom signal.
///
/// Implementations own their availability state and report changes through
/// the [`DependencyTracker`] handed to [`Dependency::start`]. A report only
/// enqueues a re-evaluation task for the observing component; lifecycle
/// logic never runs on the reporting thread.
pub trait Dependency: Send + Sync {
    /// Named dependencies can be customized by the map an `init` callback
    /// returns; unnamed dependencies cannot. Named dependencies are also
    /// built and tracked only after `init`, so the component's own state can
    /// parameterize them first.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Whether the component cannot activate without this dependency.
    fn is_required(&self) -> bool;

    /// Current availability. The engine re-reads this for the whole
    /// dependency set on every re-evaluation, so reports arriving out of
    /// order are harmless.
    fn is_available(&self) -> bool;

    /// Whether this dependency's [`Dependency::properties`] become part of
    /// the component's published attributes.
    fn is_propagated(&self) -> bool {
        false
    }

    /// Whether bind callbacks receive [`Dependency::auto_config_value`].
    fn is_auto_config(&self) -> bool {
        false
    }

    /// The value handed to bind and unbind callbacks when auto-config is
    /// enabled.
    fn auto_config_value(&self) -> Option<PropertyValue> {
        None
    }

    /// Properties contributed to the component's published attributes when
    /// this dependency is propagated.
    fn properties(&self) -> Option<Properties> {
        None
    }

    /// An independent copy, usable by another component, sharing no mutable
    /// tracking state with the original.
    fn create_copy(&self) -> Arc<dyn Dependency>;

    /// An independent copy with filter and required overrides applied. The
    /// default ignores the overrides; implementations that support init-time
    /// customization apply them to the copy.
    fn customize(&self, filter: Option<String>, required: Option<bool>) -> Arc<dyn Dependency> {
        let _ = (filter, required);
        self.create_copy()
    }

    /// Registers `tracker` as an interested component and begins watching
    /// the external change source, if any.
    fn start(&self, tracker: DependencyTracker);

    /// Unregisters the component previously registered with an equal
    /// tracker.
    fn stop(&self, tracker: &DependencyTracker);
}

/// Reporting path from a dependency back to the component observing it.
///
/// Both report methods enqueue a re-evaluation task on the owning engine's
/// queue and return immediately, so they are safe to call from any thread or
/// task, including while the engine's worker is mid-transition.
#[derive(Clone)]
pub struct DependencyTracker {
    component: ComponentId,
    dependency: DependencyId,
    queue: TaskSender<EngineTask>,
}

impl DependencyTracker {
    pub(crate) fn new(
        component: ComponentId,
        dependency: DependencyId,
        queue: TaskSender<EngineTask>,
    ) -> Self {
        Self {
            component,
            dependency,
            queue,
        }
    }

    pub fn dependency_available(&self) {
        self.report(true)
    }

    pub fn dependency_unavailable(&self) {
        self.report(false)
    }

    fn report(&self, available: bool) {
        let task = EngineTask::DependencyChanged {
            component: self.component,
            dependency: self.dependency,
            available,
        };
        if self.queue.schedule(task).is_err() {
            // only happens during engine shutdown, when the report is moot
            tracing::debug!(
                "dropping availability report for {} of terminated engine",
                self.dependency
            );
        }
    }
}

impl PartialEq for DependencyTracker {
    fn eq(&self, other: &Self) -> bool {
        self.component == other.component && self.dependency == other.dependency
    }
}

impl Eq for DependencyTracker {}

/// An external on/off signal source, shared by any number of
/// [`ToggleDependency`] handles and by whatever adapter drives it.
#[derive(Default)]
pub struct Toggle {
    available: AtomicBool,
    trackers: Mutex<Vec<DependencyTracker>>,
}

impl Toggle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Flips the signal and reports the change to every tracking component.
    /// Setting the value it already holds is a no-op.
    pub fn set_available(&self, available: bool) {
        if self.available.swap(available, Ordering::SeqCst) == available {
            return;
        }
        // snapshot so reports run outside the lock
        let trackers: Vec<DependencyTracker> = self.trackers.lock().clone();
        for tracker in trackers {
            if available {
                tracker.dependency_available();
            } else {
                tracker.dependency_unavailable();
            }
        }
    }

    fn attach(&self, tracker: DependencyTracker) {
        self.trackers.lock().push(tracker);
    }

    fn detach(&self, tracker: &DependencyTracker) {
        self.trackers.lock().retain(|t| t != tracker);
    }
}

/// A custom signal dependency backed by a shared [`Toggle`].
///
/// The dependency itself holds no mutable state, so copies are cheap and
/// observe the same toggle. The engine uses a hidden toggle to back lifecycle
/// controllers; adapters watching an external source (a resource poller, a
/// configuration watcher) flip the toggle on change.
pub struct ToggleDependency {
    toggle: Arc<Toggle>,
    name: Option<String>,
    required: bool,
    filter: Option<String>,
}

impl ToggleDependency {
    pub fn new(toggle: Arc<Toggle>, required: bool) -> Self {
        Self {
            toggle,
            name: None,
            required,
            filter: None,
        }
    }

    /// A named, and therefore init-customizable, toggle dependency.
    pub fn named(toggle: Arc<Toggle>, name: impl Into<String>, required: bool) -> Self {
        Self {
            toggle,
            name: Some(name.into()),
            required,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Selection filter for the external source, if any. Interpreting the
    /// filter is up to the adapter driving the toggle; it is carried here so
    /// init-time customization has somewhere to land.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn toggle(&self) -> &Arc<Toggle> {
        &self.toggle
    }
}

impl Dependency for ToggleDependency {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn is_available(&self) -> bool {
        self.toggle.is_available()
    }

    fn is_auto_config(&self) -> bool {
        true
    }

    fn auto_config_value(&self) -> Option<PropertyValue> {
        Some(PropertyValue::Bool(self.toggle.is_available()))
    }

    fn create_copy(&self) -> Arc<dyn Dependency> {
        Arc::new(Self {
            toggle: self.toggle.clone(),
            name: self.name.clone(),
            required: self.required,
            filter: self.filter.clone(),
        })
    }

    fn customize(&self, filter: Option<String>, required: Option<bool>) -> Arc<dyn Dependency> {
        Arc::new(Self {
            toggle: self.toggle.clone(),
            name: self.name.clone(),
            required: required.unwrap_or(self.required),
            filter: filter.or_else(|| self.filter.clone()),
        })
    }

    fn start(&self, tracker: DependencyTracker) {
        self.toggle.attach(tracker);
    }

    fn stop(&self, tracker: &DependencyTracker) {
        self.toggle.detach(tracker);
    }
}
