use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::Serialize;
use taskforge_core::TaskId;

use crate::wrapped::{TaskSnapshot, WrappedTask};

/// Change to the set of tracked tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "task", rename_all = "snake_case")]
pub enum RegistryEvent {
    Added(TaskSnapshot),
    /// Carries the snapshot taken at the terminal transition.
    Removed(TaskSnapshot),
}

impl RegistryEvent {
    pub fn snapshot(&self) -> &TaskSnapshot {
        match self {
            RegistryEvent::Added(s) | RegistryEvent::Removed(s) => s,
        }
    }
}

/// Live set of tasks known to the controller, in submission order.
///
/// Events are published while the write lock is held, so subscribers see
/// changes in exactly the order they were applied, each one once.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: RwLock<IndexMap<TaskId, Arc<WrappedTask>>>,
    subscribers: Mutex<Vec<Sender<RegistryEvent>>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<TaskId, Arc<WrappedTask>>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<TaskId, Arc<WrappedTask>>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a task. Returns the already-tracked envelope if the same task
    /// was submitted before.
    pub(crate) fn insert(&self, task: Arc<WrappedTask>) -> Result<(), Arc<WrappedTask>> {
        let mut tasks = self.write();
        if let Some(existing) = tasks.get(&task.id()) {
            return Err(Arc::clone(existing));
        }
        let event = RegistryEvent::Added(task.snapshot());
        tasks.insert(task.id(), task);
        self.publish(event);
        Ok(())
    }

    pub(crate) fn remove(&self, id: TaskId) -> Option<Arc<WrappedTask>> {
        let mut tasks = self.write();
        let removed = tasks.shift_remove(&id)?;
        self.publish(RegistryEvent::Removed(removed.snapshot()));
        Some(removed)
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Arc<WrappedTask>> {
        self.read().get(&id).cloned()
    }

    /// Copy of the current entries. Callers act on the copy with no lock held.
    pub(crate) fn tasks(&self) -> Vec<Arc<WrappedTask>> {
        self.read().values().cloned().collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.read().values().map(|t| t.snapshot()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    pub(crate) fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Current contents plus a receiver for every change after them.
    pub(crate) fn watch(&self) -> (Vec<TaskSnapshot>, Receiver<RegistryEvent>) {
        let tasks = self.read();
        let (tx, rx) = mpsc::channel();
        self.lock_subscribers().push(tx);
        (tasks.values().map(|t| t.snapshot()).collect(), rx)
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<RegistryEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: RegistryEvent) {
        // Receivers that hung up are dropped here.
        self.lock_subscribers()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Read-only, observable view of the controller's live tasks.
#[derive(Clone)]
pub struct TaskRegistryView {
    registry: Arc<TaskRegistry>,
}

impl TaskRegistryView {
    pub(crate) fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.registry.snapshot()
    }

    pub fn tasks(&self) -> Vec<Arc<WrappedTask>> {
        self.registry.tasks()
    }

    pub fn get(&self, id: TaskId) -> Option<Arc<WrappedTask>> {
        self.registry.get(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every `Added`/`Removed` event from now on.
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Like [`TaskRegistryView::subscribe`], also returning the contents the
    /// first event applies to.
    pub fn watch(&self) -> (Vec<TaskSnapshot>, Receiver<RegistryEvent>) {
        self.registry.watch()
    }
}

#[cfg(test)]
mod tests {
    use taskforge_core::{TaskPriority, TaskStatus};

    use super::*;
    use crate::task::{FnTask, Task};

    fn wrapped(label: &str) -> Arc<WrappedTask> {
        let task: Arc<dyn Task> = Arc::new(FnTask::new(label, |_| Ok(())));
        Arc::new(WrappedTask::new(task, TaskPriority::Normal))
    }

    #[test]
    fn events_arrive_once_in_mutation_order() {
        let registry = TaskRegistry::new();
        let rx = registry.subscribe();
        let a = wrapped("a");
        let b = wrapped("b");

        registry.insert(Arc::clone(&a)).unwrap();
        registry.insert(Arc::clone(&b)).unwrap();
        assert!(registry.remove(a.id()).is_some());
        assert!(registry.remove(a.id()).is_none());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], RegistryEvent::Added(s) if s.description == "a"));
        assert!(matches!(&events[1], RegistryEvent::Added(s) if s.description == "b"));
        assert!(matches!(&events[2], RegistryEvent::Removed(s) if s.id == a.id()));
    }

    #[test]
    fn duplicate_insert_returns_existing_entry() {
        let registry = TaskRegistry::new();
        let a = wrapped("a");
        registry.insert(Arc::clone(&a)).unwrap();

        let again = Arc::new(WrappedTask::new(Arc::clone(a.task()), TaskPriority::High));
        let existing = registry.insert(again).unwrap_err();
        assert!(Arc::ptr_eq(&existing, &a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn view_preserves_submission_order() {
        let registry = Arc::new(TaskRegistry::new());
        let view = TaskRegistryView::new(Arc::clone(&registry));
        assert!(view.is_empty());
        for label in ["first", "second", "third"] {
            registry.insert(wrapped(label)).unwrap();
        }
        let first = view.tasks()[0].id();
        registry.remove(first);

        let labels: Vec<_> = view.snapshot().into_iter().map(|s| s.description).collect();
        assert_eq!(labels, vec!["second", "third"]);
        assert!(view.snapshot().iter().all(|s| s.status == TaskStatus::Waiting));
        assert!(view.get(first).is_none());
    }

    #[test]
    fn watch_returns_contents_and_later_changes() {
        let registry = TaskRegistry::new();
        registry.insert(wrapped("before")).unwrap();

        let (current, rx) = registry.watch();
        registry.insert(wrapped("after")).unwrap();

        assert_eq!(current.len(), 1);
        assert_eq!(current[0].description, "before");
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].snapshot().description, "after");
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let registry = TaskRegistry::new();
        drop(registry.subscribe());
        let kept = registry.subscribe();
        registry.insert(wrapped("x")).unwrap();
        assert_eq!(kept.try_iter().count(), 1);
        assert_eq!(registry.lock_subscribers().len(), 1);
    }
}
