//! Mock actions for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::actions::Action;
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{JobError, JobResult};

/// An action that always succeeds with a fixed output.
#[derive(Debug, Clone)]
pub struct StaticAction {
    name: String,
    output: JobState,
}

impl StaticAction {
    /// Creates a static action with an empty output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: JobState::new(),
        }
    }

    /// Sets the output to return.
    #[must_use]
    pub fn with_output(mut self, output: JobState) -> Self {
        self.output = output;
        self
    }
}

#[async_trait]
impl<D: Send + Sync + ?Sized> Action<D> for StaticAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &JobState, _deps: &D, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        Ok(self.output.clone())
    }
}

/// An action that records every input it receives.
#[derive(Debug)]
pub struct RecordingAction {
    name: String,
    output: JobState,
    inputs: Mutex<Vec<JobState>>,
    attempts: Mutex<Vec<u32>>,
}

impl RecordingAction {
    /// Creates a recording action with an empty output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: JobState::new(),
            inputs: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Sets the output to return.
    #[must_use]
    pub fn with_output(mut self, output: JobState) -> Self {
        self.output = output;
        self
    }

    /// Returns the number of times the action was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the recorded inputs.
    #[must_use]
    pub fn inputs(&self) -> Vec<JobState> {
        self.inputs.lock().clone()
    }

    /// Returns the attempt number of each call.
    #[must_use]
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl<D: Send + Sync + ?Sized> Action<D> for RecordingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &JobState, _deps: &D, ctx: &ActionContext) -> anyhow::Result<JobState> {
        self.inputs.lock().push(input.clone());
        self.attempts.lock().push(ctx.attempt);
        Ok(self.output.clone())
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Raw(String),
    Structured(JobError),
}

/// An action that always fails.
#[derive(Debug)]
pub struct FailingAction {
    name: String,
    failure: Failure,
    calls: AtomicUsize,
    succeed_after: Option<usize>,
}

impl FailingAction {
    /// Fails with an unstructured error.
    #[must_use]
    pub fn raw(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: Failure::Raw(message.into()),
            calls: AtomicUsize::new(0),
            succeed_after: None,
        }
    }

    /// Fails with a structured error.
    #[must_use]
    pub fn with_error(name: impl Into<String>, error: JobError) -> Self {
        Self {
            name: name.into(),
            failure: Failure::Structured(error),
            calls: AtomicUsize::new(0),
            succeed_after: None,
        }
    }

    /// Succeeds once `failures` calls have failed.
    #[must_use]
    pub fn succeeding_after(mut self, failures: usize) -> Self {
        self.succeed_after = Some(failures);
        self
    }

    /// Returns the number of times the action was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: Send + Sync + ?Sized> Action<D> for FailingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &JobState, _deps: &D, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed_after.is_some_and(|n| previous >= n) {
            return Ok(JobState::new());
        }
        match &self.failure {
            Failure::Raw(message) => Err(anyhow::anyhow!("{message}")),
            Failure::Structured(error) => Err(error.clone().into()),
        }
    }
}

/// An action whose input validation always fails.
#[derive(Debug)]
pub struct RejectingAction {
    name: String,
    reason: String,
    executions: AtomicUsize,
}

impl RejectingAction {
    /// Creates a rejecting action.
    #[must_use]
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            executions: AtomicUsize::new(0),
        }
    }

    /// Returns how often `execute` ran. Should stay at zero.
    #[must_use]
    pub fn execute_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: Send + Sync + ?Sized> Action<D> for RejectingAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_input(&self, _input: &JobState) -> JobResult<()> {
        Err(JobError::validation(self.reason.clone()))
    }

    async fn execute(&self, _input: &JobState, _deps: &D, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(JobState::new())
    }
}

/// An action that sleeps before succeeding.
#[derive(Debug, Clone)]
pub struct SlowAction {
    name: String,
    delay: Duration,
}

impl SlowAction {
    /// Creates a slow action.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl<D: Send + Sync + ?Sized> Action<D> for SlowAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _input: &JobState, _deps: &D, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        tokio::time::sleep(self.delay).await;
        Ok(JobState::new().with(self.name.clone(), true))
    }
}
