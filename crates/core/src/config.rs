use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Task controller configuration, from env vars or a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of worker threads in the shared pool. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Thread name prefix for the shared pool.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Thread name prefix for pools created by composite tasks.
    #[serde(default = "default_child_thread_name_prefix")]
    pub child_thread_name_prefix: String,
}

fn default_worker_threads() -> usize { 0 }
fn default_thread_name_prefix() -> String { "taskforge-worker".to_string() }
fn default_child_thread_name_prefix() -> String { "taskforge-child".to_string() }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
            child_thread_name_prefix: default_child_thread_name_prefix(),
        }
    }
}

impl ControllerConfig {
    /// Build config from environment variables, loading `.env` first.
    /// Profile is read from `TASKFORGE_PROFILE`; when set (e.g. `BATCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`.
    pub fn from_env() -> Result<Self, TaskError> {
        load_dotenv();
        let profile = env_opt("TASKFORGE_PROFILE").unwrap_or_default().to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, TaskError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let mut config = Self::default();

        if let Some(raw) = profiled_env_opt(p, "TASKFORGE_WORKER_THREADS") {
            config.worker_threads = raw.parse().map_err(|_| {
                TaskError::Config(format!("TASKFORGE_WORKER_THREADS is not a number: {raw}"))
            })?;
        }
        if let Some(prefix) = profiled_env_opt(p, "TASKFORGE_THREAD_PREFIX") {
            config.thread_name_prefix = prefix;
        }
        if let Some(prefix) = profiled_env_opt(p, "TASKFORGE_CHILD_THREAD_PREFIX") {
            config.child_thread_name_prefix = prefix;
        }
        Ok(config)
    }

    /// Parse config from a TOML string. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, TaskError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            workers = self.resolved_worker_threads(),
            prefix = %self.thread_name_prefix,
            "Task controller config loaded"
        );
    }
}
