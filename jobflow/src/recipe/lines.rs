//! Ingredient and instruction line pipelines.

use async_trait::async_trait;

use super::deps::RecipeDeps;
use super::parsing::ParsedIngredient;
use super::payload::{IngredientLineJobData, InstructionLineJobData};
use super::store::{IngredientRecord, InstructionRecord};
use super::{required_str, FORMAT_INSTRUCTION, PARSE_INGREDIENT, SAVE_INGREDIENT, SAVE_INSTRUCTION};
use crate::actions::Action;
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{JobError, JobResult};

/// Parses `reference` into quantity, unit and name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseIngredientLineAction;

#[async_trait]
impl Action<RecipeDeps> for ParseIngredientLineAction {
    fn name(&self) -> &str {
        PARSE_INGREDIENT
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        let reference = required_str(input, "reference")?;
        if reference.trim().is_empty() {
            return Err(JobError::validation("Ingredient line is blank"));
        }
        Ok(())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let parsed = deps.ingredient_parser.parse(required_str(input, "reference")?)?;
        Ok(JobState::new().with("parsedIngredient", serde_json::to_value(parsed)?))
    }
}

/// Upserts the parsed ingredient row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveIngredientLineAction;

#[async_trait]
impl Action<RecipeDeps> for SaveIngredientLineAction {
    fn name(&self) -> &str {
        SAVE_INGREDIENT
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let data: IngredientLineJobData = input.to_typed()?;
        let parsed: ParsedIngredient = input.get_as("parsedIngredient")?;

        deps.repository
            .save_ingredient(IngredientRecord {
                id: data.line_id.clone(),
                note_id: data.note_id,
                line_index: data.line_index,
                reference: data.reference,
                parsed,
            })
            .await?;
        Ok(JobState::new().with("savedLineId", data.line_id))
    }
}

/// Collapses whitespace, drops a leading `Step N:` label, capitalizes and
/// terminates the sentence.
pub fn format_instruction(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let body = strip_step_label(&collapsed);

    let mut chars = body.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let mut formatted: String = first.to_uppercase().chain(chars).collect();
    if !formatted.ends_with(['.', '!', '?']) {
        formatted.push('.');
    }
    formatted
}

fn strip_step_label(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();
    if !lower.starts_with("step ") {
        return text;
    }
    let rest = &text["step ".len()..];
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return text;
    }
    rest[digits..].trim_start_matches([':', '.', ')', '-']).trim_start()
}

/// Normalizes the step text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatInstructionLineAction;

#[async_trait]
impl Action<RecipeDeps> for FormatInstructionLineAction {
    fn name(&self) -> &str {
        FORMAT_INSTRUCTION
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "text").map(|_| ())
    }

    async fn execute(&self, input: &JobState, _deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let formatted = format_instruction(required_str(input, "text")?);
        if formatted.is_empty() {
            return Err(JobError::validation("Instruction line is blank").into());
        }
        Ok(JobState::new().with("formattedText", formatted))
    }
}

/// Upserts the formatted step row.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveInstructionLineAction;

#[async_trait]
impl Action<RecipeDeps> for SaveInstructionLineAction {
    fn name(&self) -> &str {
        SAVE_INSTRUCTION
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let data: InstructionLineJobData = input.to_typed()?;
        let text = required_str(input, "formattedText")?.to_string();

        deps.repository
            .save_instruction(InstructionRecord {
                id: data.line_id.clone(),
                note_id: data.note_id,
                line_index: data.line_index,
                text,
            })
            .await?;
        Ok(JobState::new().with("savedLineId", data.line_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::NoOpBroadcaster;
    use crate::coordinator::InMemoryCompletionStore;
    use crate::errors::{classify_error, ErrorKind};
    use crate::queue::InMemoryQueue;
    use crate::recipe::store::InMemoryNoteRepository;
    use crate::testing::test_action_context;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn deps(repo: Arc<InMemoryNoteRepository>) -> RecipeDeps {
        RecipeDeps::new(
            repo,
            Arc::new(InMemoryQueue::default()),
            Arc::new(InMemoryCompletionStore::new()),
            Arc::new(NoOpBroadcaster),
        )
        .unwrap()
    }

    #[test]
    fn test_format_instruction() {
        assert_eq!(format_instruction("  mix   well "), "Mix well.");
        assert_eq!(format_instruction("Step 2: fry until golden!"), "Fry until golden!");
        assert_eq!(format_instruction("steps are easy"), "Steps are easy.");
        assert_eq!(format_instruction("   "), "");
    }

    #[test]
    fn test_blank_ingredient_rejected_before_execute() {
        let input = JobState::new().with("reference", "   ");

        let err = ParseIngredientLineAction.validate_input(&input).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_ingredient_parse_and_save() {
        let repo = Arc::new(InMemoryNoteRepository::new());
        let deps = deps(repo.clone());
        let ctx = test_action_context();
        let input = JobState::from_value(json!({
            "noteId": "note-1",
            "lineId": "note-1-ing-0",
            "reference": "2 cups flour",
            "lineIndex": 0
        }))
        .unwrap();

        let parsed = ParseIngredientLineAction.execute(&input, &deps, &ctx).await.unwrap();
        let state = input.merged(parsed);
        let saved = SaveIngredientLineAction.execute(&state, &deps, &ctx).await.unwrap();

        assert_eq!(saved.get_str("savedLineId"), Some("note-1-ing-0"));
        let rows = repo.ingredients_for("note-1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parsed.quantity, Some(2.0));
        assert_eq!(rows[0].parsed.name, "flour");
    }

    #[tokio::test]
    async fn test_save_fails_during_outage() {
        let repo = Arc::new(InMemoryNoteRepository::new());
        let deps = deps(repo.clone());
        repo.set_available(false);
        let input = JobState::from_value(json!({
            "noteId": "note-1",
            "lineId": "note-1-ins-0",
            "text": "boil",
            "lineIndex": 0,
            "formattedText": "Boil."
        }))
        .unwrap();

        let err = SaveInstructionLineAction
            .execute(&input, &deps, &test_action_context())
            .await
            .unwrap_err();

        let err = classify_error(err);
        assert_eq!(err.kind, ErrorKind::Database);
        assert!(err.is_retryable());
    }
}
