//! Recipe import workload.
//!
//! A `process-note` job cleans, parses and saves one note, then fans out
//! into one job per ingredient line, instruction step and image. Each of
//! those siblings records itself with the completion coordinator as its
//! last action; whichever sibling finishes last schedules exactly one
//! `categorize-note` job for the note.
//!
//! | job                        | queue          | pipeline                                              |
//! |----------------------------|----------------|-------------------------------------------------------|
//! | `process-note`             | `note`         | clean → parse → save → schedule follow-ups            |
//! | `process-ingredient-line`  | `ingredient`   | parse line → save line → complete sibling             |
//! | `process-instruction-line` | `instruction`  | format line → save line → complete sibling            |
//! | `process-image`            | `image`        | process image → save image → complete sibling         |
//! | `categorize-note`          | `categorization` | determine category → save category → archive counter |

mod categorization;
mod deps;
mod fanout;
mod images;
mod lines;
mod note;
mod parsing;
mod payload;
mod store;

pub use categorization::{
    ArchiveCounterAction, Categorizer, DetermineCategoryAction, KeywordCategorizer, SaveCategoryAction,
    UNCATEGORIZED,
};
pub use deps::RecipeDeps;
pub use fanout::{schedule_categorization, CategorizationTrigger, CompleteSiblingAction, SiblingFailureHook};
pub use images::{ImageProcessor, ProcessImageAction, ProcessedImage, SaveImageAction, ThumbnailPathProcessor};
pub use lines::{
    format_instruction, FormatInstructionLineAction, ParseIngredientLineAction, SaveIngredientLineAction,
    SaveInstructionLineAction,
};
pub use note::{CleanHtmlAction, ParseNoteAction, SaveNoteAction, ScheduleFollowupsAction};
pub use parsing::{
    HtmlCleaner, IngredientParser, NoteParser, ParsedIngredient, ParsedNote, RegexHtmlCleaner,
    RegexIngredientParser, SectionNoteParser,
};
pub use payload::{
    CategorizationJobData, FanOutTracking, ImageJobData, IngredientLineJobData, InstructionLineJobData,
    NoteJobData,
};
pub use store::{
    ImageRecord, InMemoryNoteRepository, IngredientRecord, InstructionRecord, NoteRecord, NoteRepository,
    RepositoryHealth,
};

use serde_json::Value;
use std::sync::Arc;

use crate::actions::Action;
use crate::config::WorkerConfig;
use crate::core::JobState;
use crate::errors::{JobError, JobResult, JobflowError};
use crate::pipeline::Pipeline;
use crate::worker::{JobFamily, TerminalFailureHook, WorkerRuntime};

/// Job name of the note pipeline.
pub const NOTE_JOB: &str = "process-note";
/// Job name of the ingredient line pipeline.
pub const INGREDIENT_JOB: &str = "process-ingredient-line";
/// Job name of the instruction line pipeline.
pub const INSTRUCTION_JOB: &str = "process-instruction-line";
/// Job name of the image pipeline.
pub const IMAGE_JOB: &str = "process-image";
/// Job name of the categorization pipeline.
pub const CATEGORIZATION_JOB: &str = "categorize-note";

/// Queue of [`NOTE_JOB`].
pub const NOTE_QUEUE: &str = "note";
/// Queue of [`INGREDIENT_JOB`].
pub const INGREDIENT_QUEUE: &str = "ingredient";
/// Queue of [`INSTRUCTION_JOB`].
pub const INSTRUCTION_QUEUE: &str = "instruction";
/// Queue of [`IMAGE_JOB`].
pub const IMAGE_QUEUE: &str = "image";
/// Queue of [`CATEGORIZATION_JOB`].
pub const CATEGORIZATION_QUEUE: &str = "categorization";

/// Payload field every recipe job carries its note ID in.
pub const PARENT_KEY: &str = "noteId";

/// Strips markup.
pub const CLEAN_HTML: &str = "clean_html";
/// Splits the note into parts.
pub const PARSE_NOTE: &str = "parse_note";
/// Upserts the note.
pub const SAVE_NOTE: &str = "save_note";
/// Fans the note out.
pub const SCHEDULE_FOLLOWUPS: &str = "schedule_followups";
/// Parses one ingredient line.
pub const PARSE_INGREDIENT: &str = "parse_ingredient_line";
/// Upserts one ingredient line.
pub const SAVE_INGREDIENT: &str = "save_ingredient_line";
/// Normalizes one step.
pub const FORMAT_INSTRUCTION: &str = "format_instruction_line";
/// Upserts one step.
pub const SAVE_INSTRUCTION: &str = "save_instruction_line";
/// Processes one image.
pub const PROCESS_IMAGE: &str = "process_image";
/// Upserts one image.
pub const SAVE_IMAGE: &str = "save_image";
/// Records a finished sibling.
pub const COMPLETE_SIBLING: &str = "complete_sibling";
/// Categorizes the note.
pub const DETERMINE_CATEGORY: &str = "determine_category";
/// Stores the categories.
pub const SAVE_CATEGORY: &str = "save_category";
/// Archives the completion counter.
pub const ARCHIVE_COUNTER: &str = "archive_counter";

/// Reads a non-empty string field.
pub(crate) fn required_str<'a>(input: &'a JobState, key: &str) -> JobResult<&'a str> {
    match input.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(JobError::validation(format!("Missing required field: {key}")))
        }
        Some(_) => Err(JobError::validation(format!("Field '{key}' must be a string"))),
    }
}

fn register<A>(runtime: &WorkerRuntime<RecipeDeps>, name: &str, action: A)
where
    A: Action<RecipeDeps> + Clone + 'static,
{
    runtime.register_action(name, move || Arc::new(action.clone()) as Arc<dyn Action<RecipeDeps>>);
}

/// Builds a worker with every recipe action and family registered.
///
/// The repository is registered as a health check, so a database outage
/// leaves jobs queued for redelivery instead of failing them.
///
/// # Errors
///
/// Returns [`JobflowError::InvalidConfig`] if the configuration is invalid.
pub fn recipe_worker(config: WorkerConfig, deps: Arc<RecipeDeps>) -> Result<WorkerRuntime<RecipeDeps>, JobflowError> {
    let runtime = WorkerRuntime::new(config, Arc::clone(&deps), Arc::clone(&deps.broadcaster))?
        .with_health_check(Arc::new(RepositoryHealth::new(Arc::clone(&deps.repository))));

    register(&runtime, CLEAN_HTML, CleanHtmlAction);
    register(&runtime, PARSE_NOTE, ParseNoteAction);
    register(&runtime, SAVE_NOTE, SaveNoteAction);
    register(&runtime, SCHEDULE_FOLLOWUPS, ScheduleFollowupsAction);
    register(&runtime, PARSE_INGREDIENT, ParseIngredientLineAction);
    register(&runtime, SAVE_INGREDIENT, SaveIngredientLineAction);
    register(&runtime, FORMAT_INSTRUCTION, FormatInstructionLineAction);
    register(&runtime, SAVE_INSTRUCTION, SaveInstructionLineAction);
    register(&runtime, PROCESS_IMAGE, ProcessImageAction);
    register(&runtime, SAVE_IMAGE, SaveImageAction);
    register(&runtime, COMPLETE_SIBLING, CompleteSiblingAction);
    register(&runtime, DETERMINE_CATEGORY, DetermineCategoryAction);
    register(&runtime, SAVE_CATEGORY, SaveCategoryAction);
    register(&runtime, ARCHIVE_COUNTER, ArchiveCounterAction);

    runtime.register_family(
        JobFamily::new(NOTE_JOB, NOTE_QUEUE, |payload: &JobState, registry| {
            let skip = payload
                .get("skipFollowupTasks")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let names: &[&str] = if skip {
                &[CLEAN_HTML, PARSE_NOTE, SAVE_NOTE]
            } else {
                &[CLEAN_HTML, PARSE_NOTE, SAVE_NOTE, SCHEDULE_FOLLOWUPS]
            };
            Pipeline::from_names(NOTE_JOB, registry, names)
        })
        .with_required_fields(&[PARENT_KEY, "content"])
        .with_parent_key(PARENT_KEY),
    );

    let sibling_hook: Arc<dyn TerminalFailureHook<RecipeDeps>> = Arc::new(SiblingFailureHook);
    let siblings = [
        (INGREDIENT_JOB, INGREDIENT_QUEUE, [PARSE_INGREDIENT, SAVE_INGREDIENT], ["lineId", "reference"]),
        (INSTRUCTION_JOB, INSTRUCTION_QUEUE, [FORMAT_INSTRUCTION, SAVE_INSTRUCTION], ["lineId", "text"]),
        (IMAGE_JOB, IMAGE_QUEUE, [PROCESS_IMAGE, SAVE_IMAGE], ["imageId", "source"]),
    ];
    for (job, queue, [first, second], [id_field, body_field]) in siblings {
        runtime.register_family(
            JobFamily::fixed(job, queue, &[first, second, COMPLETE_SIBLING])
                .with_required_fields(&[PARENT_KEY, id_field, body_field])
                .with_parent_key(PARENT_KEY)
                .with_terminal_hook(Arc::clone(&sibling_hook)),
        );
    }

    runtime.register_family(
        JobFamily::fixed(
            CATEGORIZATION_JOB,
            CATEGORIZATION_QUEUE,
            &[DETERMINE_CATEGORY, SAVE_CATEGORY, ARCHIVE_COUNTER],
        )
        .with_required_fields(&[PARENT_KEY])
        .with_parent_key(PARENT_KEY),
    );

    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::NoOpBroadcaster;
    use crate::coordinator::InMemoryCompletionStore;
    use crate::queue::InMemoryQueue;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn worker() -> WorkerRuntime<RecipeDeps> {
        let deps = RecipeDeps::new(
            Arc::new(InMemoryNoteRepository::new()),
            Arc::new(InMemoryQueue::default()),
            Arc::new(InMemoryCompletionStore::new()),
            Arc::new(NoOpBroadcaster),
        )
        .unwrap();
        recipe_worker(WorkerConfig::default(), Arc::new(deps)).unwrap()
    }

    #[test]
    fn test_required_str() {
        let state = JobState::from_value(json!({"a": "x", "b": "", "c": 3})).unwrap();

        assert_eq!(required_str(&state, "a").unwrap(), "x");
        assert!(required_str(&state, "b").unwrap_err().message.contains("Missing"));
        assert!(required_str(&state, "c").unwrap_err().message.contains("must be a string"));
        assert!(required_str(&state, "d").is_err());
    }

    #[test]
    fn test_worker_consumes_every_recipe_queue() {
        let worker = worker();

        assert_eq!(
            worker.queues(),
            vec![CATEGORIZATION_QUEUE, IMAGE_QUEUE, INGREDIENT_QUEUE, INSTRUCTION_QUEUE, NOTE_QUEUE]
        );
        assert_eq!(worker.registry().len(), 14);
    }

    #[test]
    fn test_note_pipeline_shape() {
        let worker = worker();
        let payload = JobState::new().with("noteId", "n1").with("content", "<p>x</p>");

        let full = worker.build_pipeline(NOTE_JOB, &payload).unwrap();
        assert_eq!(full.action_names(), vec![CLEAN_HTML, PARSE_NOTE, SAVE_NOTE, SCHEDULE_FOLLOWUPS]);

        let skipped = worker
            .build_pipeline(NOTE_JOB, &payload.with("skipFollowupTasks", true))
            .unwrap();
        assert_eq!(skipped.len(), 3);
    }

    #[test]
    fn test_sibling_pipelines_end_with_completion() {
        let worker = worker();
        let payload = JobState::new();

        for job in [INGREDIENT_JOB, INSTRUCTION_JOB, IMAGE_JOB] {
            let pipeline = worker.build_pipeline(job, &payload).unwrap();
            assert_eq!(pipeline.len(), 3);
            assert_eq!(pipeline.action_names().last(), Some(&COMPLETE_SIBLING));
        }
    }
}
