use std::sync::{PoisonError, RwLock};

use taskforge_core::TaskError;

use super::{TaskState, WeakTaskState};

/// Non-owning link from a unit of sub-work to the task it runs inside.
///
/// Lets helper code deep inside a task body ask "is my parent still
/// active?" without the scheduler knowing about it. The link can be cleared
/// or pointed at another task when the same helper is reused.
#[derive(Debug, Default)]
pub struct ParentLink {
    parent: RwLock<Option<WeakTaskState>>,
}

impl ParentLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked_to(parent: &TaskState) -> Self {
        let link = Self::new();
        link.set(parent);
        link
    }

    pub fn set(&self, parent: &TaskState) {
        *self.parent.write().unwrap_or_else(PoisonError::into_inner) = Some(parent.downgrade());
    }

    pub fn clear(&self) {
        *self.parent.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn parent(&self) -> Option<TaskState> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(WeakTaskState::upgrade)
    }

    pub fn is_linked(&self) -> bool {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// True when unlinked, or when the parent is still waiting or processing.
    /// A parent that has been dropped counts as inactive.
    pub fn is_parent_active(&self) -> bool {
        let guard = self.parent.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            None => true,
            Some(weak) => weak.upgrade().is_some_and(|parent| parent.is_active()),
        }
    }

    /// `Err(TaskError::Canceled)` once the parent stopped, for use with `?`.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_parent_active() {
            Ok(())
        } else {
            Err(TaskError::Canceled)
        }
    }
}

/// Sub-work that honors its owning task's cancellation.
pub trait ParentDependent {
    fn parent_link(&self) -> &ParentLink;

    fn set_parent_task(&self, parent: Option<&TaskState>) {
        match parent {
            Some(parent) => self.parent_link().set(parent),
            None => self.parent_link().clear(),
        }
    }

    fn is_parent_active(&self) -> bool {
        self.parent_link().is_parent_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PeakPicker {
        link: ParentLink,
    }

    impl ParentDependent for PeakPicker {
        fn parent_link(&self) -> &ParentLink {
            &self.link
        }
    }

    impl PeakPicker {
        fn pick(&self, scans: usize) -> Result<usize, TaskError> {
            let mut picked = 0;
            for _ in 0..scans {
                self.link.check()?;
                picked += 1;
            }
            Ok(picked)
        }
    }

    #[test]
    fn unlinked_work_is_always_active() {
        let picker = PeakPicker { link: ParentLink::new() };
        assert!(picker.is_parent_active());
        assert_eq!(picker.pick(5).unwrap(), 5);
    }

    #[test]
    fn canceled_parent_stops_helper() {
        let parent = TaskState::new();
        let picker = PeakPicker { link: ParentLink::new() };
        picker.set_parent_task(Some(&parent));

        parent.start();
        assert!(picker.is_parent_active());
        parent.cancel();
        assert!(!picker.is_parent_active());
        assert!(matches!(picker.pick(5), Err(TaskError::Canceled)));
    }

    #[test]
    fn link_can_be_reassigned_and_cleared() {
        let first = TaskState::new();
        let second = TaskState::new();
        let link = ParentLink::linked_to(&first);

        first.cancel();
        assert!(!link.is_parent_active());

        link.set(&second);
        assert!(link.is_parent_active());
        assert_eq!(link.parent().map(|p| p.id()), Some(second.id()));

        link.clear();
        assert!(!link.is_linked());
        assert!(link.is_parent_active());
    }

    #[test]
    fn link_does_not_own_parent() {
        let parent = TaskState::new();
        let link = ParentLink::linked_to(&parent);
        drop(parent);
        assert!(link.parent().is_none());
        assert!(!link.is_parent_active());
    }
}
