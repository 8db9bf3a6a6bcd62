use taskforge_core::TaskError;

use super::{Task, TaskContext, TaskState};

enum Description {
    Fixed(String),
    Computed {
        kind: String,
        describe: Box<dyn Fn() -> String + Send + Sync>,
    },
}

/// A task whose body is a closure.
///
/// Wraps a processing step that has no state of its own beyond what the
/// closure captures.
pub struct FnTask<F> {
    state: TaskState,
    description: Description,
    body: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext<'_>) -> Result<(), TaskError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, body: F) -> Self {
        Self {
            state: TaskState::new(),
            description: Description::Fixed(description.into()),
            body,
        }
    }

    /// Description computed on every read, e.g. from the wrapped algorithm.
    /// `kind` is the fixed name timings are grouped under.
    pub fn with_computed_description(
        kind: impl Into<String>,
        description: impl Fn() -> String + Send + Sync + 'static,
        body: F,
    ) -> Self {
        Self {
            state: TaskState::new(),
            description: Description::Computed {
                kind: kind.into(),
                describe: Box::new(description),
            },
            body,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext<'_>) -> Result<(), TaskError> + Send + Sync,
{
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn description(&self) -> String {
        match &self.description {
            Description::Fixed(text) => text.clone(),
            Description::Computed { describe, .. } => describe(),
        }
    }

    fn kind(&self) -> String {
        match &self.description {
            Description::Fixed(text) => text.clone(),
            Description::Computed { kind, .. } => kind.clone(),
        }
    }

    fn process(&self, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        (self.body)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn computed_description_is_read_live() {
        let files = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&files);
        let task = FnTask::with_computed_description(
            "Import",
            move || format!("Importing {} files", seen.load(Ordering::SeqCst)),
            |_| Ok(()),
        );

        assert_eq!(task.description(), "Importing 0 files");
        files.store(3, Ordering::SeqCst);
        assert_eq!(task.description(), "Importing 3 files");
        assert_eq!(task.kind(), "Import");
    }

    #[test]
    fn fixed_description() {
        let task = FnTask::new("Export to CSV", |_| Ok(()));
        assert_eq!(task.description(), "Export to CSV");
        assert_eq!(task.kind(), "Export to CSV");
    }
}
