//! Note pipeline: clean, parse, save, schedule follow-ups.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::deps::RecipeDeps;
use super::fanout::{schedule_categorization, CategorizationTrigger};
use super::parsing::ParsedNote;
use super::payload::{FanOutTracking, ImageJobData, IngredientLineJobData, InstructionLineJobData};
use super::store::NoteRecord;
use super::{
    required_str, CLEAN_HTML, IMAGE_JOB, IMAGE_QUEUE, INGREDIENT_JOB, INGREDIENT_QUEUE, INSTRUCTION_JOB,
    INSTRUCTION_QUEUE, PARSE_NOTE, SAVE_NOTE, SCHEDULE_FOLLOWUPS,
};
use crate::actions::Action;
use crate::broadcast::{broadcast_best_effort, StatusEvent};
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{JobError, JobResult};
use crate::queue::{dedupe_key, EnqueueOptions};

/// Strips markup from the raw note.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanHtmlAction;

#[async_trait]
impl Action<RecipeDeps> for CleanHtmlAction {
    fn name(&self) -> &str {
        CLEAN_HTML
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "content").map(|_| ())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, ctx: &ActionContext) -> anyhow::Result<JobState> {
        broadcast_best_effort(
            deps.broadcaster.as_ref(),
            StatusEvent::processing(ctx.correlation_id(), "note", "Cleaning note"),
        )
        .await;

        let cleaned = deps.html_cleaner.clean(required_str(input, "content")?);
        if cleaned.is_empty() {
            return Err(JobError::validation("Note has no text after cleaning").into());
        }
        Ok(JobState::new().with("cleanedContent", cleaned))
    }
}

/// Splits the cleaned note into title, ingredients, steps and images.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseNoteAction;

#[async_trait]
impl Action<RecipeDeps> for ParseNoteAction {
    fn name(&self) -> &str {
        PARSE_NOTE
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "cleanedContent").map(|_| ())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let parsed = deps.note_parser.parse(required_str(input, "cleanedContent")?)?;
        Ok(JobState::new().with("parsedNote", serde_json::to_value(parsed)?))
    }
}

/// Upserts the note row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveNoteAction;

#[async_trait]
impl Action<RecipeDeps> for SaveNoteAction {
    fn name(&self) -> &str {
        SAVE_NOTE
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "noteId")?;
        input.get_as::<ParsedNote>("parsedNote").map(|_| ())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, ctx: &ActionContext) -> anyhow::Result<JobState> {
        let note_id = required_str(input, "noteId")?;
        let parsed: ParsedNote = input.get_as("parsedNote")?;

        deps.repository
            .save_note(NoteRecord {
                id: note_id.to_string(),
                title: parsed.title.clone(),
                import_id: input.get_str("importId").map(str::to_string),
                content: input.get_str("cleanedContent").unwrap_or_default().to_string(),
                ingredient_lines: parsed.ingredients.clone(),
                categories: Vec::new(),
            })
            .await?;

        broadcast_best_effort(
            deps.broadcaster.as_ref(),
            StatusEvent::processing(ctx.correlation_id(), "note", format!("Saved note '{}'", parsed.title))
                .with_entity_id(note_id),
        )
        .await;

        Ok(JobState::new()
            .with("savedNoteId", note_id)
            .with("title", parsed.title))
    }
}

struct Followup {
    queue: &'static str,
    job: &'static str,
    member_id: String,
    payload: Value,
}

fn plan_followups(note_id: &str, import_id: Option<&str>, parsed: &ParsedNote) -> JobResult<Vec<Followup>> {
    let total = u32::try_from(parsed.followup_count())
        .map_err(|_| JobError::validation(format!("Note {note_id} has too many follow-up items")))?;
    let import_id = import_id.map(str::to_string);
    let mut index = 0u32;
    let mut next_tracking = |member_id: &str| {
        let tracking = FanOutTracking {
            member_id: member_id.to_string(),
            index,
            total,
        };
        index += 1;
        Some(tracking)
    };

    let mut plan = Vec::with_capacity(parsed.followup_count());
    let to_value =
        |v: Result<Value, serde_json::Error>| v.map_err(|e| JobError::validation(format!("Unserializable payload: {e}")));

    for (line_index, reference) in (0u32..).zip(&parsed.ingredients) {
        let line_id = format!("{note_id}-ing-{line_index}");
        let payload = to_value(serde_json::to_value(IngredientLineJobData {
            note_id: note_id.to_string(),
            line_id: line_id.clone(),
            reference: reference.clone(),
            line_index,
            import_id: import_id.clone(),
            tracking: next_tracking(&line_id),
        }))?;
        plan.push(Followup {
            queue: INGREDIENT_QUEUE,
            job: INGREDIENT_JOB,
            member_id: line_id,
            payload,
        });
    }
    for (line_index, text) in (0u32..).zip(&parsed.instructions) {
        let line_id = format!("{note_id}-ins-{line_index}");
        let payload = to_value(serde_json::to_value(InstructionLineJobData {
            note_id: note_id.to_string(),
            line_id: line_id.clone(),
            text: text.clone(),
            line_index,
            import_id: import_id.clone(),
            tracking: next_tracking(&line_id),
        }))?;
        plan.push(Followup {
            queue: INSTRUCTION_QUEUE,
            job: INSTRUCTION_JOB,
            member_id: line_id,
            payload,
        });
    }
    for (position, source) in (0u32..).zip(&parsed.images) {
        let image_id = format!("{note_id}-img-{position}");
        let payload = to_value(serde_json::to_value(ImageJobData {
            note_id: note_id.to_string(),
            image_id: image_id.clone(),
            source: source.clone(),
            import_id: import_id.clone(),
            tracking: next_tracking(&image_id),
        }))?;
        plan.push(Followup {
            queue: IMAGE_QUEUE,
            job: IMAGE_JOB,
            member_id: image_id,
            payload,
        });
    }
    Ok(plan)
}

/// Fans the note out into one job per ingredient, step and image.
///
/// The expected total is recorded before any sibling is enqueued. A note
/// with nothing to fan out schedules categorization directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleFollowupsAction;

#[async_trait]
impl Action<RecipeDeps> for ScheduleFollowupsAction {
    fn name(&self) -> &str {
        SCHEDULE_FOLLOWUPS
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "noteId")?;
        input.get_as::<ParsedNote>("parsedNote").map(|_| ())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, ctx: &ActionContext) -> anyhow::Result<JobState> {
        let note_id = required_str(input, "noteId")?;
        let import_id = input.get_str("importId");
        let parsed: ParsedNote = input.get_as("parsedNote")?;
        let plan = plan_followups(note_id, import_id, &parsed)?;

        if plan.is_empty() {
            schedule_categorization(deps.queue.as_ref(), note_id, import_id.map(str::to_string)).await?;
            info!(note_id, "Note has no follow-up items; categorization scheduled");
            return Ok(JobState::new()
                .with("scheduledJobs", 0)
                .with("categorizationScheduled", true));
        }

        let total = u32::try_from(plan.len())?;
        let trigger = CategorizationTrigger::new(Arc::clone(&deps.queue), import_id.map(str::to_string));
        deps.coordinator.expect_siblings(note_id, total, &trigger).await?;

        let handles = try_join_all(plan.into_iter().map(|followup| {
            let key = dedupe_key(&[followup.job, note_id, followup.member_id.as_str()]);
            deps.queue.enqueue(
                followup.queue,
                followup.job,
                followup.payload,
                EnqueueOptions::default().with_dedupe_key(key),
            )
        }))
        .await?;

        let deduplicated = handles.iter().filter(|h| h.deduplicated).count();
        info!(note_id, total, deduplicated, attempt = ctx.attempt, "Follow-up jobs scheduled");
        broadcast_best_effort(
            deps.broadcaster.as_ref(),
            StatusEvent::processing(ctx.correlation_id(), "note", format!("Scheduled {total} follow-up jobs"))
                .with_total(total),
        )
        .await;

        Ok(JobState::new()
            .with("scheduledJobs", total)
            .with("categorizationScheduled", false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::CollectingBroadcaster;
    use crate::coordinator::{CompletionStore, InMemoryCompletionStore};
    use crate::core::ProcessingStatus;
    use crate::errors::ErrorKind;
    use crate::queue::{InMemoryQueue, JobQueue};
    use crate::recipe::store::InMemoryNoteRepository;
    use crate::recipe::CATEGORIZATION_QUEUE;
    use crate::testing::test_action_context;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryCompletionStore>,
        repo: Arc<InMemoryNoteRepository>,
        events: Arc<CollectingBroadcaster>,
        deps: RecipeDeps,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueue::default());
        let store = Arc::new(InMemoryCompletionStore::new());
        let repo = Arc::new(InMemoryNoteRepository::new());
        let events = Arc::new(CollectingBroadcaster::new());
        let deps = RecipeDeps::new(repo.clone(), queue.clone(), store.clone(), events.clone()).unwrap();
        Harness {
            queue,
            store,
            repo,
            events,
            deps,
        }
    }

    fn parsed(ingredients: &[&str], instructions: &[&str], images: &[&str]) -> Value {
        serde_json::to_value(ParsedNote {
            title: "Soup".into(),
            ingredients: ingredients.iter().map(|s| (*s).to_string()).collect(),
            instructions: instructions.iter().map(|s| (*s).to_string()).collect(),
            images: images.iter().map(|s| (*s).to_string()).collect(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_clean_then_parse() {
        let h = harness();
        let ctx = test_action_context();
        let input = JobState::new().with("content", "<h1>Soup</h1><p>Ingredients</p><ul><li>water</li></ul>");

        let cleaned = CleanHtmlAction.execute(&input, &h.deps, &ctx).await.unwrap();
        let state = input.merged(cleaned);
        let parsed = ParseNoteAction.execute(&state, &h.deps, &ctx).await.unwrap();

        let note: ParsedNote = parsed.get_as("parsedNote").unwrap();
        assert_eq!(note.title, "Soup");
        assert_eq!(note.ingredients, vec!["water"]);
    }

    #[tokio::test]
    async fn test_clean_rejects_markup_only_note() {
        let h = harness();
        let input = JobState::new().with("content", "<div></div>");

        let err = CleanHtmlAction
            .execute(&input, &h.deps, &test_action_context())
            .await
            .unwrap_err();

        assert_eq!(crate::errors::classify_error(err).kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_save_note_upserts() {
        let h = harness();
        let input = JobState::from_value(json!({
            "noteId": "note-1",
            "cleanedContent": "Soup",
            "parsedNote": parsed(&["water"], &[], &[]),
        }))
        .unwrap();

        SaveNoteAction.execute(&input, &h.deps, &test_action_context()).await.unwrap();
        SaveNoteAction.execute(&input, &h.deps, &test_action_context()).await.unwrap();

        assert_eq!(h.repo.note_count(), 1);
        assert_eq!(h.repo.note("note-1").unwrap().ingredient_lines, vec!["water"]);
    }

    #[tokio::test]
    async fn test_schedule_fans_out_with_tracking() {
        let h = harness();
        let input = JobState::from_value(json!({
            "noteId": "note-1",
            "importId": "import-1",
            "parsedNote": parsed(&["1 cup water", "salt"], &["Boil."], &["soup.jpg"]),
        }))
        .unwrap();

        let output = ScheduleFollowupsAction
            .execute(&input, &h.deps, &test_action_context())
            .await
            .unwrap();

        assert_eq!(output.get("scheduledJobs"), Some(&json!(4)));
        assert_eq!(h.store.get("note-1").await.unwrap().unwrap().total_expected, 4);
        assert_eq!(h.queue.waiting_count(INGREDIENT_QUEUE), 2);
        assert_eq!(h.queue.waiting_count(INSTRUCTION_QUEUE), 1);
        assert_eq!(h.queue.waiting_count(IMAGE_QUEUE), 1);

        let image = h.queue.dequeue(IMAGE_QUEUE).await.unwrap().unwrap();
        assert_eq!(image.job.payload["tracking"], json!({"memberId": "note-1-img-0", "index": 3, "total": 4}));
        assert_eq!(image.job.payload["importId"], json!("import-1"));

        let scheduled = h
            .events
            .events_for("job-test")
            .into_iter()
            .find(|e| e.total_count == Some(4))
            .unwrap();
        assert_eq!(scheduled.status, ProcessingStatus::Processing);
    }

    #[tokio::test]
    async fn test_schedule_redelivery_does_not_duplicate() {
        let h = harness();
        let input = JobState::from_value(json!({
            "noteId": "note-1",
            "parsedNote": parsed(&["water"], &["Boil."], &[]),
        }))
        .unwrap();

        ScheduleFollowupsAction.execute(&input, &h.deps, &test_action_context()).await.unwrap();
        ScheduleFollowupsAction.execute(&input, &h.deps, &test_action_context()).await.unwrap();

        assert_eq!(h.queue.waiting_count(INGREDIENT_QUEUE), 1);
        assert_eq!(h.queue.waiting_count(INSTRUCTION_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_schedule_without_items_goes_straight_to_categorization() {
        let h = harness();
        let input = JobState::from_value(json!({
            "noteId": "note-1",
            "parsedNote": parsed(&[], &[], &[]),
        }))
        .unwrap();

        let output = ScheduleFollowupsAction
            .execute(&input, &h.deps, &test_action_context())
            .await
            .unwrap();

        assert_eq!(output.get("categorizationScheduled"), Some(&json!(true)));
        assert!(h.store.is_empty());
        assert_eq!(h.queue.waiting_count(CATEGORIZATION_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_reschedule_with_fewer_items_fires_categorization() {
        use crate::coordinator::SiblingOutcome;

        let h = harness();
        let first = JobState::from_value(json!({
            "noteId": "note-1",
            "parsedNote": parsed(&["water", "salt", "pepper"], &[], &[]),
        }))
        .unwrap();
        ScheduleFollowupsAction.execute(&first, &h.deps, &test_action_context()).await.unwrap();
        for member in ["note-1-ing-0", "note-1-ing-1"] {
            h.store
                .atomic_increment("note-1", member, SiblingOutcome::Succeeded)
                .await
                .unwrap();
        }

        let shorter = JobState::from_value(json!({
            "noteId": "note-1",
            "parsedNote": parsed(&["water"], &[], &[]),
        }))
        .unwrap();
        ScheduleFollowupsAction.execute(&shorter, &h.deps, &test_action_context()).await.unwrap();

        assert_eq!(h.store.get("note-1").await.unwrap().unwrap().total_expected, 1);
        assert_eq!(h.queue.waiting_count(CATEGORIZATION_QUEUE), 1);
    }
}
