//! Note persistence.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::parsing::ParsedIngredient;
use crate::errors::JobError;
use crate::health::HealthCheck;

/// A saved note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    /// Note ID.
    pub id: String,
    /// Title line.
    pub title: String,
    /// Batch import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
    /// Cleaned text.
    pub content: String,
    /// Ingredient lines as written.
    pub ingredient_lines: Vec<String>,
    /// Categories assigned by categorization.
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A saved ingredient line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientRecord {
    /// Stable line ID.
    pub id: String,
    /// Parent note.
    pub note_id: String,
    /// Position in the list.
    pub line_index: u32,
    /// Line text as written.
    pub reference: String,
    /// Parsed fields.
    pub parsed: ParsedIngredient,
}

/// A saved instruction step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionRecord {
    /// Stable line ID.
    pub id: String,
    /// Parent note.
    pub note_id: String,
    /// Position in the list.
    pub line_index: u32,
    /// Normalized step text.
    pub text: String,
}

/// A saved image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Stable image ID.
    pub id: String,
    /// Parent note.
    pub note_id: String,
    /// Reference found in the note.
    pub source: String,
    /// Derived thumbnail location.
    pub thumbnail: String,
    /// Lowercased file extension.
    pub format: String,
}

/// Persistence for notes and their derived rows.
///
/// Every write is an upsert keyed by ID so a redelivered job rewrites the
/// same row instead of adding a second one.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Inserts or replaces a note.
    async fn save_note(&self, note: NoteRecord) -> anyhow::Result<()>;

    /// Loads a note.
    async fn get_note(&self, note_id: &str) -> anyhow::Result<Option<NoteRecord>>;

    /// Inserts or replaces an ingredient line.
    async fn save_ingredient(&self, record: IngredientRecord) -> anyhow::Result<()>;

    /// Inserts or replaces an instruction step.
    async fn save_instruction(&self, record: InstructionRecord) -> anyhow::Result<()>;

    /// Inserts or replaces an image.
    async fn save_image(&self, record: ImageRecord) -> anyhow::Result<()>;

    /// Replaces a note's categories.
    async fn save_categories(&self, note_id: &str, categories: Vec<String>) -> anyhow::Result<()>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    notes: HashMap<String, NoteRecord>,
    ingredients: HashMap<String, IngredientRecord>,
    instructions: HashMap<String, InstructionRecord>,
    images: HashMap<String, ImageRecord>,
}

/// In-process repository used by tests and single-node runs.
#[derive(Debug)]
pub struct InMemoryNoteRepository {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl Default for InMemoryNoteRepository {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryNoteRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every call fails with a
    /// database error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(JobError::database("Note repository is unavailable").into())
        }
    }

    /// Returns a saved note.
    pub fn note(&self, note_id: &str) -> Option<NoteRecord> {
        self.tables.read().notes.get(note_id).cloned()
    }

    /// Number of saved notes.
    pub fn note_count(&self) -> usize {
        self.tables.read().notes.len()
    }

    /// Ingredient rows of a note, in line order.
    pub fn ingredients_for(&self, note_id: &str) -> Vec<IngredientRecord> {
        let mut rows: Vec<_> = self
            .tables
            .read()
            .ingredients
            .values()
            .filter(|r| r.note_id == note_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.line_index);
        rows
    }

    /// Instruction rows of a note, in line order.
    pub fn instructions_for(&self, note_id: &str) -> Vec<InstructionRecord> {
        let mut rows: Vec<_> = self
            .tables
            .read()
            .instructions
            .values()
            .filter(|r| r.note_id == note_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.line_index);
        rows
    }

    /// Image rows of a note, sorted by ID.
    pub fn images_for(&self, note_id: &str) -> Vec<ImageRecord> {
        let mut rows: Vec<_> = self
            .tables
            .read()
            .images
            .values()
            .filter(|r| r.note_id == note_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }
}

#[async_trait]
impl NoteRepository for InMemoryNoteRepository {
    async fn save_note(&self, note: NoteRecord) -> anyhow::Result<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write();
        // Categories belong to categorization; a re-saved note keeps them.
        let categories = tables
            .notes
            .get(&note.id)
            .map(|existing| existing.categories.clone())
            .unwrap_or_default();
        let note = if note.categories.is_empty() {
            NoteRecord { categories, ..note }
        } else {
            note
        };
        tables.notes.insert(note.id.clone(), note);
        Ok(())
    }

    async fn get_note(&self, note_id: &str) -> anyhow::Result<Option<NoteRecord>> {
        self.ensure_available()?;
        Ok(self.note(note_id))
    }

    async fn save_ingredient(&self, record: IngredientRecord) -> anyhow::Result<()> {
        self.ensure_available()?;
        self.tables.write().ingredients.insert(record.id.clone(), record);
        Ok(())
    }

    async fn save_instruction(&self, record: InstructionRecord) -> anyhow::Result<()> {
        self.ensure_available()?;
        self.tables.write().instructions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn save_image(&self, record: ImageRecord) -> anyhow::Result<()> {
        self.ensure_available()?;
        self.tables.write().images.insert(record.id.clone(), record);
        Ok(())
    }

    async fn save_categories(&self, note_id: &str, categories: Vec<String>) -> anyhow::Result<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write();
        let note = tables
            .notes
            .get_mut(note_id)
            .ok_or_else(|| JobError::validation(format!("Note {note_id} not found")))?;
        note.categories = categories;
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.ensure_available()
    }
}

/// Health check over a [`NoteRepository`].
pub struct RepositoryHealth {
    repository: Arc<dyn NoteRepository>,
}

impl RepositoryHealth {
    /// Wraps a repository.
    pub fn new(repository: Arc<dyn NoteRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl HealthCheck for RepositoryHealth {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> anyhow::Result<()> {
        self.repository.ping().await
    }
}
