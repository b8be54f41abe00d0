use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::dependency::Toggle;

/// Manual lifecycle control for a component, injected at registration time.
///
/// [`Controller::activate`] admits the component to `Active` once its other
/// requirements are met; [`Controller::deactivate`] forces deactivation.
/// Both flip a hidden required toggle dependency the engine adds to the
/// component after `init`. Each handle is idempotent: repeated calls while
/// already in that state are no-ops, decided by a single compare-and-set so
/// concurrent callers race safely.
#[derive(Clone)]
pub struct Controller {
    started: Arc<AtomicBool>,
    toggle: Arc<Toggle>,
    component: String,
}

impl Controller {
    pub(crate) fn new(toggle: Arc<Toggle>, component: String) -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            toggle,
            component,
        }
    }

    pub fn activate(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!(
                "lifecycle controller is activating component {}",
                self.component
            );
            self.toggle.set_available(true);
        }
    }

    pub fn deactivate(&self) {
        if self
            .started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!(
                "lifecycle controller is deactivating component {}",
                self.component
            );
            self.toggle.set_available(false);
        }
    }

    pub(crate) fn toggle(&self) -> &Arc<Toggle> {
        &self.toggle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_flip_the_toggle_once_per_direction() {
        let toggle = Arc::new(Toggle::new());
        let controller = Controller::new(toggle.clone(), "test".into());
        assert!(!toggle.is_available());

        controller.activate();
        controller.activate();
        assert!(toggle.is_available());

        controller.deactivate();
        controller.deactivate();
        assert!(!toggle.is_available());
    }
}
