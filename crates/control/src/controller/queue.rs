use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskforge_core::{TaskId, TaskPriority};

use crate::wrapped::WrappedTask;

/// Priority-ordered queue of submitted tasks waiting for a worker.
///
/// Pops the highest priority first, and within one priority the earliest
/// submission first.
#[derive(Default)]
pub(crate) struct PendingQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<PendingEntry>,
    next_seq: u64,
}

struct PendingEntry {
    priority: TaskPriority,
    seq: u64,
    task: Arc<WrappedTask>,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the lower sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, task: Arc<WrappedTask>) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(PendingEntry {
            priority: task.priority(),
            seq,
            task,
        });
    }

    pub(crate) fn pop(&self) -> Option<Arc<WrappedTask>> {
        self.lock().heap.pop().map(|entry| entry.task)
    }

    /// Drop a pending task. Returns false if it was not queued.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let mut inner = self.lock();
        let before = inner.heap.len();
        inner.heap.retain(|entry| entry.task.id() != id);
        inner.heap.len() != before
    }

    /// Change the priority of a still-pending task, keeping its place among
    /// tasks of the new priority by submission order. Returns false if the
    /// task is no longer queued.
    pub(crate) fn reprioritize(&self, id: TaskId, priority: TaskPriority) -> bool {
        let mut inner = self.lock();
        let mut entries = std::mem::take(&mut inner.heap).into_vec();
        let mut found = false;
        for entry in entries.iter_mut().filter(|e| e.task.id() == id) {
            entry.priority = priority;
            entry.task.set_priority(priority);
            found = true;
        }
        inner.heap = BinaryHeap::from(entries);
        found
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.lock().heap.iter().any(|entry| entry.task.id() == id)
    }

    pub(crate) fn pending_by_priority(&self) -> HashMap<TaskPriority, usize> {
        let mut counts = HashMap::new();
        for entry in self.lock().heap.iter() {
            *counts.entry(entry.priority).or_default() += 1;
        }
        counts
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().heap.len()
    }
}
