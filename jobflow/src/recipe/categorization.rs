//! Categorization pipeline: runs once per note after every sibling finished.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::info;

use super::deps::RecipeDeps;
use super::store::NoteRecord;
use super::{required_str, ARCHIVE_COUNTER, DETERMINE_CATEGORY, SAVE_CATEGORY};
use crate::actions::Action;
use crate::broadcast::{broadcast_best_effort, StatusEvent};
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{JobError, JobResult};

/// Assigns categories to a saved note.
pub trait Categorizer: Send + Sync {
    /// Returns the note's categories, sorted and without duplicates.
    fn categorize(&self, note: &NoteRecord) -> Vec<String>;
}

/// Category assigned when no rule matches.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Matches keywords against the title and ingredient lines.
#[derive(Debug, Clone)]
pub struct KeywordCategorizer {
    rules: Vec<(String, Vec<String>)>,
}

impl Default for KeywordCategorizer {
    fn default() -> Self {
        Self::empty()
            .with_rule("baking", &["flour", "yeast", "baking powder", "baking soda"])
            .with_rule("dessert", &["sugar", "chocolate", "cake", "cookie", "vanilla"])
            .with_rule("meat", &["chicken", "beef", "pork", "lamb", "bacon"])
            .with_rule("pasta", &["pasta", "spaghetti", "noodle", "penne"])
            .with_rule("soup", &["soup", "broth", "stock", "stew"])
    }
}

impl KeywordCategorizer {
    /// Creates a categorizer with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Adds a rule; keywords match case-insensitively as substrings.
    #[must_use]
    pub fn with_rule(mut self, category: impl Into<String>, keywords: &[&str]) -> Self {
        self.rules.push((
            category.into(),
            keywords.iter().map(|k| k.to_lowercase()).collect(),
        ));
        self
    }
}

impl Categorizer for KeywordCategorizer {
    fn categorize(&self, note: &NoteRecord) -> Vec<String> {
        let haystack = std::iter::once(note.title.as_str())
            .chain(note.ingredient_lines.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();

        let matched: BTreeSet<&str> = self
            .rules
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|(category, _)| category.as_str())
            .collect();

        if matched.is_empty() {
            vec![UNCATEGORIZED.to_string()]
        } else {
            matched.into_iter().map(str::to_string).collect()
        }
    }
}

/// Loads the note and runs the categorizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetermineCategoryAction;

#[async_trait]
impl Action<RecipeDeps> for DetermineCategoryAction {
    fn name(&self) -> &str {
        DETERMINE_CATEGORY
    }

    fn validate_input(&self, input: &JobState) -> JobResult<()> {
        required_str(input, "noteId").map(|_| ())
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let note_id = required_str(input, "noteId")?;
        let note = deps
            .repository
            .get_note(note_id)
            .await?
            .ok_or_else(|| JobError::validation(format!("Note {note_id} not found")))?;

        Ok(JobState::new().with("categories", deps.categorizer.categorize(&note)))
    }
}

/// Stores the categories on the note.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveCategoryAction;

#[async_trait]
impl Action<RecipeDeps> for SaveCategoryAction {
    fn name(&self) -> &str {
        SAVE_CATEGORY
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, _ctx: &ActionContext) -> anyhow::Result<JobState> {
        let note_id = required_str(input, "noteId")?;
        let categories: Vec<String> = input.get_as("categories")?;

        deps.repository.save_categories(note_id, categories.clone()).await?;
        Ok(JobState::new().with("savedCategories", categories))
    }
}

/// Archives the note's completion counter and reports the import done.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveCounterAction;

#[async_trait]
impl Action<RecipeDeps> for ArchiveCounterAction {
    fn name(&self) -> &str {
        ARCHIVE_COUNTER
    }

    async fn execute(&self, input: &JobState, deps: &RecipeDeps, ctx: &ActionContext) -> anyhow::Result<JobState> {
        let note_id = required_str(input, "noteId")?;
        let archived = deps.coordinator.store().archive(note_id).await?;
        let had_failures = archived.as_ref().is_some_and(|c| c.failed);

        info!(note_id, archived = archived.is_some(), had_failures, "Note import finished");
        broadcast_best_effort(
            deps.broadcaster.as_ref(),
            StatusEvent::completed(ctx.correlation_id(), "categorization", "Note import complete")
                .with_entity_id(note_id)
                .with_metadata(json!({
                    "categories": input.get("categories"),
                    "hadFailures": had_failures,
                })),
        )
        .await;

        Ok(JobState::new()
            .with("counterArchived", archived.is_some())
            .with("hadFailures", had_failures))
    }
}
