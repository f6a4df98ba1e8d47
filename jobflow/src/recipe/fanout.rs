//! Fan-in glue: recording finished siblings and scheduling categorization.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::deps::RecipeDeps;
use super::payload::{CategorizationJobData, FanOutTracking};
use super::{required_str, CATEGORIZATION_JOB, CATEGORIZATION_QUEUE, COMPLETE_SIBLING};
use crate::actions::Action;
use crate::broadcast::{broadcast_best_effort, StatusEvent};
use crate::context::ActionContext;
use crate::coordinator::{DownstreamTrigger, SiblingOutcome};
use crate::core::JobState;
use crate::errors::{JobError, JobResult};
use crate::queue::{dedupe_key, EnqueueOptions, JobHandle, JobQueue};
use crate::worker::TerminalFailureHook;

/// Enqueues the categorization job for a note.
///
/// The dedupe key is derived from the note ID, so concurrent or repeated
/// calls while the job is live collapse into one.
pub async fn schedule_categorization(
    queue: &dyn JobQueue,
    note_id: &str,
    import_id: Option<String>,
) -> JobResult<JobHandle> {
    let payload = serde_json::to_value(CategorizationJobData {
        note_id: note_id.to_string(),
        import_id,
    })
    .map_err(|e| JobError::validation(format!("Unserializable categorization payload: {e}")))?;

    queue
        .enqueue(
            CATEGORIZATION_QUEUE,
            CATEGORIZATION_JOB,
            payload,
            EnqueueOptions::default().with_dedupe_key(dedupe_key(&[CATEGORIZATION_JOB, note_id])),
        )
        .await
}

/// [`DownstreamTrigger`] that schedules categorization.
pub struct CategorizationTrigger {
    queue: Arc<dyn JobQueue>,
    import_id: Option<String>,
}

impl CategorizationTrigger {
    /// Creates a trigger.
    pub fn new(queue: Arc<dyn JobQueue>, import_id: Option<String>) -> Self {
        Self { queue, import_id }
    }
}

#[async_trait]
impl DownstreamTrigger for CategorizationTrigger {
    fn name(&self) -> &str {
        CATEGORIZATION_JOB
    }

    async fn fire(&self, parent_id: &str) -> anyhow::Result<()> {
        schedule_categorization(self.queue.as_ref(), parent_id, self.import_id.clone()).await?;
        Ok(())
    }
}

fn tracking_of(value: Option<&Value>) -> JobResult<Option<FanOutTracking>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| JobError::validation(format!("Malformed tracking: {e}"))),
    }
}

fn import_id_of(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Last action of every sibling pipeline.
///
/// Records the sibling as finished and, when it is the last one, schedules
/// categorization. A job without tracking ran standalone and records
/// nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteSiblingAction;

#[async_trait]
impl Action<RecipeDeps> for CompleteSiblingAction {
    fn name(&self) -> &str {
        COMPLETE_SIBLING
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "noteId")?;
        tracking_of(input.get("tracking"))?;
        Ok(())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, ctx: &ActionContext) -> anyhow::Result<JobState> {
        let note_id = required_str(input, "noteId")?;
        let Some(tracking) = tracking_of(input.get("tracking"))? else {
            debug!(job_id = %ctx.job_id, "Job has no fan-out tracking; nothing to record");
            return Ok(JobState::new().with("siblingRecorded", false));
        };

        let trigger = CategorizationTrigger::new(Arc::clone(&deps.queue), import_id_of(input.get("importId")));
        let progress = deps
            .coordinator
            .record_completion(note_id, &tracking.member_id, SiblingOutcome::Succeeded, &trigger)
            .await?;

        broadcast_best_effort(
            deps.broadcaster.as_ref(),
            StatusEvent::processing(
                note_id,
                ctx.queue_name.clone(),
                format!(
                    "Processed {} {}/{}",
                    ctx.queue_name,
                    tracking.index + 1,
                    tracking.total
                ),
            )
            .with_entity_id(tracking.member_id.clone())
            .with_progress(progress.completed_count, progress.total_expected)
            .with_indent_level(1),
        )
        .await;

        Ok(JobState::new()
            .with("siblingRecorded", true)
            .with("completedCount", progress.completed_count)
            .with("isLastSibling", progress.is_last))
    }
}

/// Records a terminally failed sibling as finished so its note still gets
/// categorized.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiblingFailureHook;

#[async_trait]
impl TerminalFailureHook<RecipeDeps> for SiblingFailureHook {
    async fn on_terminal_failure(
        &self,
        payload: &Value,
        deps: &RecipeDeps,
        ctx: &ActionContext,
        error: &JobError,
    ) -> anyhow::Result<()> {
        let Some(note_id) = payload.get("noteId").and_then(Value::as_str) else {
            return Ok(());
        };
        let Some(tracking) = tracking_of(payload.get("tracking"))? else {
            return Ok(());
        };

        warn!(
            note_id,
            member_id = %tracking.member_id,
            job_id = %ctx.job_id,
            error = %error,
            "Sibling failed; counting it as finished"
        );
        let trigger = CategorizationTrigger::new(Arc::clone(&deps.queue), import_id_of(payload.get("importId")));
        deps.coordinator
            .record_completion(note_id, &tracking.member_id, SiblingOutcome::Failed, &trigger)
            .await?;
        Ok(())
    }
}
