//! Action wrapper and sequential pipeline runner.

use tracing::{debug, info};

use super::Pipeline;
use crate::actions::Action;
use crate::broadcast::{broadcast_best_effort, StatusBroadcaster, StatusEvent};
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{classify_error, log_error, JobError, JobResult};
use crate::observability::ActionTimer;

/// Runs the actions of one job delivery.
///
/// Every action call goes through [`execute_action`](Self::execute_action),
/// which classifies, enriches and logs failures and emits a best-effort
/// `Failed` broadcast before returning the structured error. Retry decisions
/// are left to the caller.
pub struct PipelineExecutor<'a, D: Send + Sync + ?Sized> {
    deps: &'a D,
    ctx: &'a ActionContext,
    broadcaster: &'a dyn StatusBroadcaster,
}

impl<'a, D: Send + Sync + ?Sized> PipelineExecutor<'a, D> {
    /// Creates an executor for one delivery.
    #[must_use]
    pub fn new(deps: &'a D, ctx: &'a ActionContext, broadcaster: &'a dyn StatusBroadcaster) -> Self {
        Self {
            deps,
            ctx,
            broadcaster,
        }
    }

    /// Runs a pipeline, folding each action's output into the state.
    ///
    /// Stops at the first failing action.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the failing action.
    pub async fn run(&self, pipeline: &Pipeline<D>, input: JobState) -> JobResult<JobState> {
        let timer = ActionTimer::start(pipeline.family());
        let mut state = input;

        for action in pipeline.actions() {
            let output = self.execute_action(action.as_ref(), &state).await?;
            state.merge(output);
        }

        info!(
            job_id = %self.ctx.job_id,
            queue = %self.ctx.queue_name,
            family = %pipeline.family(),
            actions = pipeline.len(),
            duration_ms = timer.finish(),
            "Pipeline completed"
        );
        Ok(state)
    }

    /// Validates and executes one action.
    ///
    /// # Errors
    ///
    /// Validation failures are returned as `Validation` errors without
    /// calling `execute`. Execution failures are classified.
    pub async fn execute_action(&self, action: &dyn Action<D>, input: &JobState) -> JobResult<JobState> {
        let name = action.name();

        if let Err(err) = action.validate_input(input) {
            let err = self.enrich(err.into_validation(), name);
            log_error(&err);
            self.broadcast_failure(name, &err).await;
            return Err(err);
        }

        debug!(
            job_id = %self.ctx.job_id,
            action = %name,
            attempt = self.ctx.attempt,
            "Action started"
        );
        let timer = ActionTimer::start(name);

        match action.execute(input, self.deps, self.ctx).await {
            Ok(output) => {
                debug!(
                    job_id = %self.ctx.job_id,
                    action = %name,
                    produced = ?output.keys(),
                    duration_ms = timer.finish(),
                    "Action completed"
                );
                Ok(output)
            }
            Err(raw) => {
                let err = self.enrich(classify_error(raw), name);
                log_error(&err);
                self.broadcast_failure(name, &err).await;
                Err(err)
            }
        }
    }

    fn enrich(&self, err: JobError, action: &str) -> JobError {
        err.with_action_context(self.ctx).with_context_entry("action", action)
    }

    async fn broadcast_failure(&self, action: &str, err: &JobError) {
        let event = StatusEvent::failed(
            self.ctx.correlation_id(),
            action,
            format!("{action} failed: {}", err.message),
        );
        broadcast_best_effort(self.broadcaster, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{CollectingBroadcaster, MockStatusBroadcaster};
    use crate::core::ProcessingStatus;
    use crate::errors::{ErrorKind, Severity};
    use crate::testing::{test_action_context, FailingAction, RecordingAction, RejectingAction, StaticAction};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_folds_outputs_left_to_right() {
        let ctx = test_action_context();
        let broadcaster = CollectingBroadcaster::new();
        let recorder = Arc::new(RecordingAction::new("inspect"));
        let pipeline: Pipeline<()> = Pipeline::new("note")
            .with_action(Arc::new(
                StaticAction::new("clean").with_output(JobState::new().with("content", "Soup")),
            ))
            .with_action(Arc::new(
                StaticAction::new("parse").with_output(JobState::new().with("title", "Soup").with("lines", 2)),
            ))
            .with_action(recorder.clone())
            .with_action(Arc::new(StaticAction::new("save").with_output(JobState::new().with("lines", 3))));

        let input = JobState::from_value(json!({"noteId": "n1", "content": "<h1>Soup</h1>"})).unwrap();
        let executor = PipelineExecutor::new(&(), &ctx, &broadcaster);
        let state = executor.run(&pipeline, input).await.unwrap();

        assert_eq!(
            state.to_value(),
            json!({"noteId": "n1", "content": "Soup", "title": "Soup", "lines": 3})
        );
        assert_eq!(recorder.inputs()[0].get("lines"), Some(&json!(2)));
        assert!(broadcaster.is_empty());
    }

    #[tokio::test]
    async fn test_validation_short_circuits_execute() {
        let ctx = test_action_context();
        let broadcaster = CollectingBroadcaster::new();
        let rejecting = Arc::new(RejectingAction::new("parse", "content is empty"));
        let after = Arc::new(RecordingAction::new("save"));
        let pipeline: Pipeline<()> = Pipeline::new("note")
            .with_action(rejecting.clone())
            .with_action(after.clone());

        let executor = PipelineExecutor::new(&(), &ctx, &broadcaster);
        let err = executor.run(&pipeline, JobState::new()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert_eq!(rejecting.execute_count(), 0);
        assert_eq!(after.call_count(), 0);
        assert_eq!(broadcaster.events()[0].status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_raw_failure_is_classified_and_enriched() {
        let ctx = test_action_context();
        let broadcaster = CollectingBroadcaster::new();
        let action = FailingAction::raw("save", "db down");

        let executor = PipelineExecutor::new(&(), &ctx, &broadcaster);
        let err = executor.execute_action(&action, &JobState::new()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.severity, Severity::Critical);
        assert_eq!(err.message, "db down");
        assert_eq!(err.job_id.as_deref(), Some(ctx.job_id.as_str()));
        assert_eq!(err.queue_name.as_deref(), Some(ctx.queue_name.as_str()));
        assert_eq!(err.retry_count, Some(ctx.attempt));
        assert_eq!(err.context.get("action"), Some(&json!("save")));

        let events = broadcaster.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "save failed: db down");
    }

    #[tokio::test]
    async fn test_structured_failure_keeps_kind() {
        let ctx = test_action_context();
        let broadcaster = CollectingBroadcaster::new();
        let action = FailingAction::with_error("parse", JobError::external_service("parser offline"));

        let executor = PipelineExecutor::new(&(), &ctx, &broadcaster);
        let err = executor.execute_action(&action, &JobState::new()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ExternalService);
        assert_eq!(action.call_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_failure_does_not_mask_error() {
        let ctx = test_action_context();
        let mut broadcaster = MockStatusBroadcaster::new();
        broadcaster
            .expect_broadcast()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("socket closed")));
        let action = FailingAction::raw("save", "db down");

        let executor = PipelineExecutor::new(&(), &ctx, &broadcaster);
        let err = executor.execute_action(&action, &JobState::new()).await.unwrap_err();

        assert_eq!(err.message, "db down");
    }
}
