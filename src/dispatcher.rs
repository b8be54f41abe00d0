use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::LogError,
    properties::{Customization, Properties, PropertyValue},
};

/// Lifecycle callbacks received by every composition instance of a
/// component.
///
/// Every method has a default no-op body, so an implementation only writes
/// the callbacks it cares about; a missing callback is not an error. A
/// callback returning `Err` is logged and isolated: the remaining
/// composition instances still receive the invocation and the surrounding
/// transition completes, because a partially-failed user callback must not
/// corrupt the engine's own invariants.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Invoked exactly once per activation cycle, before `start`. The
    /// returned map may customize named dependencies (`<name>.filter`,
    /// `<name>.required`) before they are built and tracked.
    async fn init(&self) -> anyhow::Result<Customization> {
        Ok(Customization::default())
    }

    /// Invoked once all required dependencies are satisfied, after the bind
    /// callbacks for required dependencies. The returned properties are
    /// merged into the component's published properties and win over
    /// identically-named existing entries.
    async fn start(&self) -> anyhow::Result<Properties> {
        Ok(Properties::new())
    }

    /// Invoked when the component leaves the active states, before
    /// dependencies are unbound.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked at the end of a deactivation cycle, if and only if `init` ran
    /// in the same cycle.
    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// A dependency was bound. `value` carries the dependency's
    /// auto-configured value when it declares one, and nothing otherwise.
    async fn dependency_bound(
        &self,
        name: Option<&str>,
        value: Option<PropertyValue>,
    ) -> anyhow::Result<()> {
        let _ = (name, value);
        Ok(())
    }

    /// A dependency was unbound, either because it became unavailable or
    /// because it was removed.
    async fn dependency_unbound(
        &self,
        name: Option<&str>,
        value: Option<PropertyValue>,
    ) -> anyhow::Result<()> {
        let _ = (name, value);
        Ok(())
    }
}

/// Invokes lifecycle callbacks on a component's composition instances in
/// list order, isolating each instance's failures.
pub(crate) struct Dispatcher {
    label: String,
    composition: Vec<Arc<dyn Lifecycle>>,
}

impl Dispatcher {
    pub fn new(label: String, composition: Vec<Arc<dyn Lifecycle>>) -> Self {
        Self { label, composition }
    }

    /// Runs `init` on every instance and merges the returned customization
    /// maps, later instances winning.
    pub async fn init(&self) -> Customization {
        let mut merged = Customization::default();
        for instance in &self.composition {
            if let Some(map) = instance
                .init()
                .await
                .log_with_context(|| format!("init callback failed for component {}", self.label))
            {
                merged.merge(map);
            }
        }
        merged
    }

    /// Runs `start` on every instance and merges the returned extra
    /// properties, later instances winning.
    pub async fn start(&self) -> Properties {
        let mut extra = Properties::new();
        for instance in &self.composition {
            if let Some(properties) = instance
                .start()
                .await
                .log_with_context(|| format!("start callback failed for component {}", self.label))
            {
                extra.extend(properties);
            }
        }
        extra
    }

    pub async fn stop(&self) {
        for instance in &self.composition {
            instance
                .stop()
                .await
                .log_with_context(|| format!("stop callback failed for component {}", self.label));
        }
    }

    pub async fn destroy(&self) {
        for instance in &self.composition {
            instance.destroy().await.log_with_context(|| {
                format!("destroy callback failed for component {}", self.label)
            });
        }
    }

    pub async fn bound(&self, name: Option<&str>, value: Option<PropertyValue>) {
        for instance in &self.composition {
            instance
                .dependency_bound(name, value.clone())
                .await
                .log_with_context(|| {
                    format!(
                        "bind callback failed for dependency {:?} of component {}",
                        name, self.label
                    )
                });
        }
    }

    pub async fn unbound(&self, name: Option<&str>, value: Option<PropertyValue>) {
        for instance in &self.composition {
            instance
                .dependency_unbound(name, value.clone())
                .await
                .log_with_context(|| {
                    format!(
                        "unbind callback failed for dependency {:?} of component {}",
                        name, self.label
                    )
                });
        }
    }
}
