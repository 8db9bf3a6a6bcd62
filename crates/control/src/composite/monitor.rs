use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Tracks how many children of a batch have settled, the first child outcome
/// that stops the batch, and whether the parent itself has ended, so the
/// parent's thread can sleep until one of those happens.
pub(crate) struct BatchMonitor {
    total: usize,
    progress: Mutex<BatchProgress>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct BatchProgress {
    settled: usize,
    parent_done: bool,
    stop: Option<ChildOutcome>,
}

/// A child outcome that ends the batch early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChildOutcome {
    Failed { child: String, reason: String },
    Canceled { child: String },
}

impl BatchMonitor {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            progress: Mutex::new(BatchProgress::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn settled(&self) -> usize {
        self.lock().settled
    }

    /// Record one child reaching a terminal status. `publish` sees the new
    /// count before any waiter is woken. Returns the new count.
    pub(crate) fn child_settled(&self, publish: impl FnOnce(usize)) -> usize {
        let mut progress = self.lock();
        progress.settled = (progress.settled + 1).min(self.total);
        publish(progress.settled);
        self.changed.notify_all();
        progress.settled
    }

    /// Record a child outcome that ends the batch. The first failure is kept
    /// and replaces an earlier cancellation. Returns true if recorded.
    pub(crate) fn stop(&self, outcome: ChildOutcome) -> bool {
        let mut progress = self.lock();
        let record = match (&progress.stop, &outcome) {
            (None, _) => true,
            (Some(ChildOutcome::Canceled { .. }), ChildOutcome::Failed { .. }) => true,
            _ => false,
        };
        if !record {
            return false;
        }
        progress.stop = Some(outcome);
        self.changed.notify_all();
        true
    }

    pub(crate) fn stopped_by(&self) -> Option<ChildOutcome> {
        self.lock().stop.clone()
    }

    pub(crate) fn parent_done(&self) {
        let mut progress = self.lock();
        progress.parent_done = true;
        self.changed.notify_all();
    }

    /// Block until every child settled, a child stopped the batch, or the
    /// parent ended. Returns true when all children settled.
    pub(crate) fn wait(&self) -> bool {
        let progress = self.lock();
        let progress = self
            .changed
            .wait_while(progress, |p| p.settled < self.total && !p.parent_done && p.stop.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        progress.settled >= self.total
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn wait_returns_when_all_children_settle() {
        let monitor = Arc::new(BatchMonitor::new(3));
        let remote = Arc::clone(&monitor);
        let worker = thread::spawn(move || {
            for _ in 0..3 {
                remote.child_settled(|_| {});
            }
        });
        assert!(monitor.wait());
        worker.join().unwrap();
        assert_eq!(monitor.settled(), 3);
    }

    #[test]
    fn wait_returns_early_when_parent_ends() {
        let monitor = Arc::new(BatchMonitor::new(5));
        monitor.child_settled(|_| {});
        let remote = Arc::clone(&monitor);
        let worker = thread::spawn(move || remote.parent_done());
        assert!(!monitor.wait());
        worker.join().unwrap();
        assert_eq!(monitor.settled(), 1);
    }

    #[test]
    fn first_stopping_child_is_kept_and_wakes_the_waiter() {
        let monitor = Arc::new(BatchMonitor::new(4));
        let remote = Arc::clone(&monitor);
        let worker = thread::spawn(move || {
            assert!(remote.stop(ChildOutcome::Failed {
                child: "centroid".to_string(),
                reason: "empty scan".to_string(),
            }));
            assert!(!remote.stop(ChildOutcome::Canceled { child: "export".to_string() }));
        });
        assert!(!monitor.wait());
        worker.join().unwrap();
        assert_eq!(
            monitor.stopped_by(),
            Some(ChildOutcome::Failed {
                child: "centroid".to_string(),
                reason: "empty scan".to_string(),
            })
        );
    }

    #[test]
    fn later_failure_replaces_a_child_cancel() {
        let monitor = BatchMonitor::new(3);
        assert!(monitor.stop(ChildOutcome::Canceled { child: "export".to_string() }));
        assert!(monitor.stop(ChildOutcome::Failed {
            child: "align".to_string(),
            reason: "no reference".to_string(),
        }));
        assert!(!monitor.stop(ChildOutcome::Canceled { child: "plot".to_string() }));
        assert!(matches!(monitor.stopped_by(), Some(ChildOutcome::Failed { child, .. }) if child == "align"));
    }

    #[test]
    fn settled_count_never_exceeds_total() {
        let monitor = BatchMonitor::new(1);
        let mut seen = Vec::new();
        monitor.child_settled(|n| seen.push(n));
        assert_eq!(monitor.child_settled(|n| seen.push(n)), 1);
        assert_eq!(seen, vec![1, 1]);
        assert_eq!(monitor.total(), 1);
    }
}
