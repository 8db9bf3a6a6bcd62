//! Integration tests for composite batches sharing pools and reporting
//! progress to outside observers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskforge_control::{
    Executor, FnTask, PoolTask, Task, TaskController, TaskError, TaskPriority, TaskStatus, WorkerPool,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn sleepy(label: String, ms: u64) -> Arc<dyn Task> {
    Arc::new(FnTask::new(label, move |ctx| {
        for _ in 0..ms {
            ctx.check_canceled()?;
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }))
}

fn batch_of(prefix: &str, n: usize, ms: u64) -> Vec<Arc<dyn Task>> {
    (0..n).map(|i| sleepy(format!("{prefix} {i}"), ms)).collect()
}

#[test]
fn sibling_batches_share_a_pool_without_closing_it() {
    let pool: Arc<dyn Executor> = Arc::new(WorkerPool::new("shared", 3).unwrap());
    let first = Arc::new(PoolTask::with_executor("first", batch_of("a", 5, 3), Arc::clone(&pool), false));
    let second = Arc::new(PoolTask::with_executor("second", batch_of("b", 5, 3), Arc::clone(&pool), false));

    let runners: Vec<_> = [&first, &second]
        .into_iter()
        .map(|batch| {
            let batch = Arc::clone(batch);
            thread::spawn(move || batch.run())
        })
        .collect();
    for runner in runners {
        runner.join().unwrap();
    }

    assert_eq!(first.status(), TaskStatus::Finished);
    assert_eq!(second.status(), TaskStatus::Finished);
    assert!(!pool.is_shutdown());
}

#[test]
fn failure_stays_inside_its_own_batch() {
    let controller = TaskController::with_workers(2).unwrap();

    let mut doomed_children = batch_of("ok", 3, 20);
    doomed_children.push(Arc::new(FnTask::new("broken", |_| Err(TaskError::failed("bad header")))));
    let doomed = Arc::new(PoolTask::new("doomed", doomed_children, controller.thread_per_child()));
    let healthy = Arc::new(PoolTask::new("healthy", batch_of("fine", 4, 2), controller.child_pool(2)));

    let handles = controller.submit_all(
        [doomed.clone() as Arc<dyn Task>, healthy.clone() as Arc<dyn Task>],
        TaskPriority::Normal,
    );
    for handle in &handles {
        assert!(handle.wait_timeout(TIMEOUT));
    }

    assert_eq!(doomed.status(), TaskStatus::Error);
    assert!(doomed.error_message().unwrap().contains("broken"));
    assert!(doomed
        .children()
        .iter()
        .filter(|c| c.description().starts_with("ok"))
        .all(|c| c.status() != TaskStatus::Error));
    assert_eq!(healthy.status(), TaskStatus::Finished);
    assert_eq!(healthy.finished_percentage(), 1.0);

    let metrics = controller.metrics();
    assert_eq!(metrics.tasks_failed, 1);
    assert_eq!(metrics.tasks_finished, 1);
}

#[test]
fn observed_progress_only_takes_child_fractions_and_never_drops() {
    let n = 8;
    let children = (0..n).map(|i| sleepy(format!("part {i}"), 2 + (i as u64 % 3) * 4)).collect();
    let batch = Arc::new(PoolTask::fixed("parts", children, 3));

    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let batch = Arc::clone(&batch);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut samples = Vec::new();
            let deadline = Instant::now() + TIMEOUT;
            while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
                samples.push(batch.finished_percentage());
                thread::sleep(Duration::from_micros(200));
            }
            samples
        })
    };

    batch.run();
    done.store(true, Ordering::SeqCst);
    let samples = sampler.join().unwrap();

    assert_eq!(batch.status(), TaskStatus::Finished);
    assert_eq!(batch.finished_percentage(), 1.0);
    for pair in samples.windows(2) {
        assert!(pair[1] >= pair[0], "progress dropped: {:?}", pair);
    }
    for sample in samples {
        let scaled = sample * n as f64;
        assert!((scaled - scaled.round()).abs() < 1e-9, "not a child fraction: {sample}");
    }
}

#[test]
fn empty_batch_through_the_controller() {
    let controller = TaskController::with_workers(1).unwrap();
    let batch = Arc::new(PoolTask::new("nothing", Vec::new(), controller.child_pool(0)));

    let handle = controller.submit(batch.clone(), TaskPriority::High);
    assert!(handle.wait_timeout(TIMEOUT));

    assert_eq!(batch.status(), TaskStatus::Finished);
    assert_eq!(batch.finished_percentage(), 1.0);
}
