use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskforge_core::{TaskPriority, TaskStatus};

/// Counters and timings maintained by the task controller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerMetrics {
    pub tasks_submitted: u64,
    pub tasks_finished: u64,
    pub tasks_failed: u64,
    pub tasks_canceled: u64,
    /// Tasks waiting for a worker, per priority.
    pub tasks_pending: HashMap<TaskPriority, usize>,
    /// Tasks currently executing on a worker.
    pub tasks_running: usize,
    pub worker_threads: usize,
    /// Running tasks over worker threads (0.0 - 1.0).
    pub worker_utilization: f64,
    /// Average wall time by task kind, for tasks that actually ran.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Number of timed runs by task kind.
    pub executions: HashMap<String, u64>,
    pub last_run: HashMap<String, DateTime<Utc>>,
}

impl ControllerMetrics {
    pub fn new(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    pub fn record_submitted(&mut self) {
        self.tasks_submitted += 1;
    }

    /// Refresh the queue depth and running gauges.
    pub fn record_load(&mut self, pending: HashMap<TaskPriority, usize>, running: usize) {
        self.tasks_pending = pending;
        self.tasks_running = running;
        self.worker_utilization = if self.worker_threads == 0 {
            0.0
        } else {
            (running as f64 / self.worker_threads as f64).min(1.0)
        };
    }

    /// Count a task reaching a terminal status. `duration` is the time spent
    /// processing, absent for tasks canceled before they started.
    pub fn record_terminal(&mut self, status: TaskStatus, kind: &str, duration: Option<Duration>) {
        match status {
            TaskStatus::Finished => self.tasks_finished += 1,
            TaskStatus::Error => self.tasks_failed += 1,
            TaskStatus::Canceled => self.tasks_canceled += 1,
            TaskStatus::Waiting | TaskStatus::Processing => return,
        }
        if let Some(duration) = duration {
            self.record_execution(kind, duration);
        }
    }

    fn record_execution(&mut self, kind: &str, duration: Duration) {
        let count = self.executions.entry(kind.to_string()).or_default();
        *count += 1;
        let count = *count;
        self.last_run.insert(kind.to_string(), Utc::now());

        let prev_avg = self
            .avg_task_duration
            .get(kind)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(kind.to_string(), new_avg);
    }

    /// Tasks that reached a terminal status.
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_finished + self.tasks_failed + self.tasks_canceled
    }
}
