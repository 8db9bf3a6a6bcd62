//! task-runner -- drives the task controller with synthetic work.
//!
//! Submits a set of independent stepped tasks plus one composite export batch,
//! streams registry changes to the log, optionally cancels the batch after a
//! deadline, and prints the controller metrics as JSON when everything has
//! settled.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use taskforge_control::{
    ControllerCell, ControllerConfig, FnTask, ParentLink, PoolTask, RegistryEvent, Task, TaskError,
    TaskPriority, WrappedTask,
};

static CONTROLLER: ControllerCell = ControllerCell::new();

// ── CLI ─────────────────────────────────────────────────────────────

/// Run synthetic tasks through the task controller.
#[derive(Parser, Debug)]
#[command(name = "task-runner", version, about)]
struct Cli {
    /// Worker threads (0 = available parallelism). Overrides the config.
    #[arg(long, env = "TASKFORGE_WORKER_THREADS")]
    workers: Option<usize>,

    /// Path to a TOML controller config.
    #[arg(long, env = "TASKFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of independent tasks to submit.
    #[arg(long, default_value_t = 6)]
    tasks: usize,

    /// Number of children in the export batch.
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Index of a batch child that should fail.
    #[arg(long)]
    fail_child: Option<usize>,

    /// Cancel the batch after this many milliseconds.
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Steps per synthetic task.
    #[arg(long, default_value_t = 10)]
    steps: usize,

    /// Sleep per step, in milliseconds.
    #[arg(long, default_value_t = 20)]
    step_ms: u64,
}

// ── Synthetic work ──────────────────────────────────────────────────

fn stepped_task(description: String, steps: usize, step: Duration) -> Arc<dyn Task> {
    Arc::new(FnTask::new(description, move |ctx| {
        for done in 0..steps {
            ctx.check_canceled()?;
            thread::sleep(step);
            ctx.set_progress_ratio(done + 1, steps);
        }
        Ok(())
    }))
}

/// A batch child that also stops once its batch is no longer active.
fn export_part(index: usize, fail: bool, batch: &Arc<ParentLink>, steps: usize, step: Duration) -> Arc<dyn Task> {
    let batch = Arc::clone(batch);
    Arc::new(FnTask::new(format!("Export part {index}"), move |ctx| {
        for done in 0..steps {
            ctx.check_canceled()?;
            batch.check()?;
            if fail && done == steps / 2 {
                return Err(TaskError::failed(format!("disk full while writing part {index}")));
            }
            thread::sleep(step);
            ctx.set_progress_ratio(done + 1, steps);
        }
        Ok(())
    }))
}

fn load_config(cli: &Cli) -> anyhow::Result<ControllerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = ControllerConfig::from_file(path)?;
            info!(path = %path.display(), "loaded controller config");
            config
        }
        None => ControllerConfig::from_env()?,
    };
    if let Some(workers) = cli.workers {
        config.worker_threads = workers;
    }
    Ok(config)
}

fn log_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::Added(task) => {
            info!(task = %task.id, priority = %task.priority, "+ {}", task.description);
        }
        RegistryEvent::Removed(task) => match &task.error {
            Some(error) => warn!(task = %task.id, status = %task.status, error = %error, "- {}", task.description),
            None => info!(
                task = %task.id,
                status = %task.status,
                progress = task.progress,
                "- {}",
                task.description
            ),
        },
    }
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let controller = CONTROLLER.get_or_init(config)?;
    let step = Duration::from_millis(cli.step_ms);

    let view = controller.read_only_tasks();
    let (existing, events) = view.watch();
    drop(view);
    info!(tracked = existing.len(), "watching task registry");
    let logger = thread::Builder::new()
        .name("task-runner-events".to_string())
        .spawn(move || {
            for event in events {
                log_event(&event);
            }
        })?;

    let mut submitted: Vec<Arc<WrappedTask>> = (0..cli.tasks)
        .map(|i| {
            let priority = if i % 3 == 2 { TaskPriority::High } else { TaskPriority::Normal };
            controller.submit(stepped_task(format!("Process sample {i}"), cli.steps, step), priority)
        })
        .collect();

    let link = Arc::new(ParentLink::new());
    let children = (0..cli.batch_size)
        .map(|i| export_part(i, cli.fail_child == Some(i), &link, cli.steps, step))
        .collect();
    let batch = Arc::new(PoolTask::new(
        "Export batch",
        children,
        controller.child_pool(cli.batch_size),
    ));
    link.set(batch.state());
    let batch_handle = controller.submit(batch.clone(), TaskPriority::Normal);
    submitted.push(Arc::clone(&batch_handle));

    if let Some(ms) = cli.cancel_after_ms {
        let batch_handle = Arc::clone(&batch_handle);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            info!(after_ms = ms, "deadline reached, canceling export batch");
            batch_handle.cancel();
        });
    }

    for task in &submitted {
        task.wait();
    }

    info!(
        status = %batch.status(),
        finished_children = batch.finished_children(),
        progress = batch.finished_percentage(),
        "export batch settled"
    );
    if let Some(error) = batch.error_message() {
        warn!(error = %error, "export batch failed");
    }

    println!("{}", serde_json::to_string_pretty(&controller.metrics())?);

    // The event stream ends once the last controller reference is gone.
    CONTROLLER.reset();
    drop(controller);
    if logger.join().is_err() {
        warn!("event logger thread panicked");
    }
    Ok(())
}
