use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskforge_core::{ControllerConfig, TaskError};
use tracing::warn;

use super::TaskController;

/// Holder for the one controller an application uses.
///
/// Initialization is idempotent: the first successful `get_or_init` builds
/// the controller, later calls return that same instance whatever config
/// they pass. Can live in a `static` when a process-wide instance is wanted.
pub struct ControllerCell {
    controller: Mutex<Option<Arc<TaskController>>>,
}

impl ControllerCell {
    pub const fn new() -> Self {
        Self {
            controller: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<TaskController>>> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The controller, if one was initialized.
    pub fn get(&self) -> Option<Arc<TaskController>> {
        self.lock().clone()
    }

    /// Build the controller from `config` on first use; afterwards return the
    /// existing one. A failed build leaves the cell empty.
    pub fn get_or_init(&self, config: ControllerConfig) -> Result<Arc<TaskController>, TaskError> {
        let mut slot = self.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.config() != &config {
                warn!(
                    requested = ?config,
                    active = ?existing.config(),
                    "Controller already initialized, ignoring new config"
                );
            }
            return Ok(Arc::clone(existing));
        }

        config.log_summary();
        let controller = Arc::new(TaskController::new(config)?);
        *slot = Some(Arc::clone(&controller));
        Ok(controller)
    }

    /// Lazily initialize with the default config.
    pub fn get_or_init_default(&self) -> Result<Arc<TaskController>, TaskError> {
        match self.get() {
            Some(controller) => Ok(controller),
            None => self.get_or_init(ControllerConfig::default()),
        }
    }

    /// Take the controller out of the cell and shut it down.
    pub fn reset(&self) -> Option<Arc<TaskController>> {
        let taken = self.lock().take();
        if let Some(controller) = &taken {
            controller.shutdown();
        }
        taken
    }
}

impl Default for ControllerCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SHARED: ControllerCell = ControllerCell::new();

    #[test]
    fn reinitialization_returns_existing_instance() {
        let cell = ControllerCell::new();
        assert!(cell.get().is_none());

        let first = cell
            .get_or_init(ControllerConfig {
                worker_threads: 2,
                ..ControllerConfig::default()
            })
            .unwrap();
        let second = cell
            .get_or_init(ControllerConfig {
                worker_threads: 7,
                ..ControllerConfig::default()
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.worker_threads(), 2);
        assert!(Arc::ptr_eq(&cell.get_or_init_default().unwrap(), &first));
    }

    #[test]
    fn works_as_a_static() {
        let a = SHARED.get_or_init_default().unwrap();
        let b = SHARED.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn reset_shuts_down_and_empties_the_cell() {
        let cell = ControllerCell::default();
        let controller = cell.get_or_init(ControllerConfig::default()).unwrap();
        let taken = cell.reset().unwrap();

        assert!(Arc::ptr_eq(&controller, &taken));
        assert!(controller.is_shutdown());
        assert!(cell.get().is_none());
    }
}
