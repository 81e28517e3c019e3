#![allow(clippy::result_large_err)] // Backend trait returns AppError directly for structured diagnostics without boxing.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::workflow::graph::NodeState;
use crate::core::workflow::task::TaskPayload;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opaque handle returned by a backend for a submitted payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(pub String);

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of polling a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub state: NodeState,
    pub result: Option<Value>,
}

impl PollOutcome {
    pub fn running() -> Self {
        Self {
            state: NodeState::Running,
            result: None,
        }
    }

    pub fn succeeded(result: Value) -> Self {
        Self {
            state: NodeState::Succeeded,
            result: Some(result),
        }
    }

    pub fn failed() -> Self {
        Self {
            state: NodeState::Failed,
            result: None,
        }
    }
}

/// Out-of-process executor for task payloads.
///
/// Both calls must return promptly: the controller observes completion only by polling.
pub trait ExecutionBackend: Send + Sync {
    fn submit(&self, task: &TaskPayload) -> Result<BackendHandle, AppError>;

    fn poll(&self, handle: &BackendHandle) -> Result<PollOutcome, AppError>;
}

/// Runs a payload to completion for [`InProcessBackend`].
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: &TaskPayload) -> Result<Value, String>;
}

impl<F> TaskRunner for F
where
    F: Fn(&TaskPayload) -> Result<Value, String> + Send + Sync + 'static,
{
    fn run(&self, task: &TaskPayload) -> Result<Value, String> {
        self(task)
    }
}

/// Runner that echoes the payload spec back as the result.
pub struct EchoRunner;

impl TaskRunner for EchoRunner {
    fn run(&self, task: &TaskPayload) -> Result<Value, String> {
        Ok(task.spec.clone())
    }
}

enum JobStatus {
    Running(JoinHandle<()>),
    Succeeded(Value),
    Failed(String),
}

/// Where [`InProcessBackend`] executes submitted payloads.
#[derive(Debug, Clone)]
pub enum ExecutionMode {
    /// Run during `submit`; results are visible on the next poll.
    Inline,
    /// Run on the blocking pool of a tokio runtime.
    Blocking(Handle),
}

/// Backend that executes payloads inside the current process.
///
/// A terminal outcome is handed out by `poll` once; the job is forgotten afterwards.
#[derive(Clone)]
pub struct InProcessBackend {
    runner: Arc<dyn TaskRunner>,
    jobs: Arc<DashMap<String, JobStatus>>,
    mode: ExecutionMode,
}

impl InProcessBackend {
    pub fn new<R: TaskRunner>(runner: R, mode: ExecutionMode) -> Self {
        Self {
            runner: Arc::new(runner),
            jobs: Arc::new(DashMap::new()),
            mode,
        }
    }

    pub fn inline<R: TaskRunner>(runner: R) -> Self {
        Self::new(runner, ExecutionMode::Inline)
    }

    /// Run jobs on the blocking pool of the runtime this is called from.
    pub fn threaded<R: TaskRunner>(runner: R) -> Result<Self, AppError> {
        let handle = Handle::try_current().map_err(|err| {
            AppError::new(
                ErrorCategory::ConfigurationError,
                format!("threaded backend needs a tokio runtime: {}", err),
            )
            .with_code("RF-BACKEND-003")
        })?;
        Ok(Self::new(runner, ExecutionMode::Blocking(handle)))
    }

    /// Jobs submitted but not yet handed back by `poll`.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn finish(jobs: &DashMap<String, JobStatus>, id: String, outcome: Result<Value, String>) {
        let status = match outcome {
            Ok(value) => JobStatus::Succeeded(value),
            Err(message) => JobStatus::Failed(message),
        };
        jobs.insert(id, status);
    }
}

impl Default for InProcessBackend {
    fn default() -> Self {
        Self::inline(EchoRunner)
    }
}

impl ExecutionBackend for InProcessBackend {
    fn submit(&self, task: &TaskPayload) -> Result<BackendHandle, AppError> {
        let id = Uuid::new_v4().to_string();
        match &self.mode {
            ExecutionMode::Inline => {
                let outcome = self.runner.run(task);
                Self::finish(&self.jobs, id.clone(), outcome);
            }
            ExecutionMode::Blocking(runtime) => {
                let runner = Arc::clone(&self.runner);
                let jobs = Arc::clone(&self.jobs);
                let payload = task.clone();
                let job_id = id.clone();
                // Hold the shard lock so the worker cannot record its outcome before the
                // running entry exists.
                let entry = self.jobs.entry(id.clone());
                let join = runtime.spawn_blocking(move || {
                    let outcome = runner.run(&payload);
                    Self::finish(&jobs, job_id, outcome);
                });
                entry.insert(JobStatus::Running(join));
            }
        }
        tracing::debug!(handle = %id, task = %task.name, "payload submitted");
        Ok(BackendHandle(id))
    }

    fn poll(&self, handle: &BackendHandle) -> Result<PollOutcome, AppError> {
        let running = match self.jobs.get(&handle.0) {
            Some(entry) => {
                matches!(entry.value(), JobStatus::Running(join) if !join.is_finished())
            }
            None => return Err(unknown_handle(handle)),
        };
        if running {
            return Ok(PollOutcome::running());
        }
        let Some((_, status)) = self.jobs.remove(&handle.0) else {
            return Err(unknown_handle(handle));
        };
        match status {
            JobStatus::Running(_) => {
                // Workers record their outcome before returning, so a finished worker still
                // marked running panicked.
                tracing::warn!(handle = %handle, "payload worker panicked");
                Ok(PollOutcome::failed())
            }
            JobStatus::Succeeded(value) => Ok(PollOutcome::succeeded(value)),
            JobStatus::Failed(message) => {
                tracing::warn!(handle = %handle, error = %message, "payload failed");
                Ok(PollOutcome::failed())
            }
        }
    }
}

fn unknown_handle(handle: &BackendHandle) -> AppError {
    AppError::new(
        ErrorCategory::LookupError,
        format!("unknown backend handle {}", handle),
    )
    .with_code("RF-BACKEND-002")
}
