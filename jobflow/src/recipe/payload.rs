//! Typed job payloads for the recipe queues.

use serde::{Deserialize, Serialize};

/// Payload of a `process-note` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteJobData {
    /// The note being imported.
    pub note_id: String,
    /// Raw HTML content.
    pub content: String,
    /// Batch import the note belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
    /// When true the note is saved but no per-line jobs are scheduled.
    #[serde(default)]
    pub skip_followup_tasks: bool,
}

/// Fan-out bookkeeping carried by every sibling job.
///
/// Present iff the job was scheduled as part of a note's fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutTracking {
    /// Unique member key within the parent, e.g. `ingredient:note-1-ing-0`.
    pub member_id: String,
    /// Zero-based position among all siblings.
    pub index: u32,
    /// Total siblings of the parent.
    pub total: u32,
}

/// Payload of a `process-ingredient-line` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientLineJobData {
    /// Parent note.
    pub note_id: String,
    /// Stable line ID.
    pub line_id: String,
    /// Line text as written.
    pub reference: String,
    /// Position within the ingredient list.
    pub line_index: u32,
    /// Batch import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
    /// Fan-out bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<FanOutTracking>,
}

/// Payload of a `process-instruction-line` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionLineJobData {
    /// Parent note.
    pub note_id: String,
    /// Stable line ID.
    pub line_id: String,
    /// Step text as written.
    pub text: String,
    /// Position within the instruction list.
    pub line_index: u32,
    /// Batch import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
    /// Fan-out bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<FanOutTracking>,
}

/// Payload of a `process-image` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJobData {
    /// Parent note.
    pub note_id: String,
    /// Stable image ID.
    pub image_id: String,
    /// Image reference found in the note.
    pub source: String,
    /// Batch import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
    /// Fan-out bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<FanOutTracking>,
}

/// Payload of a `categorize-note` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizationJobData {
    /// The note to categorize.
    pub note_id: String,
    /// Batch import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_id: Option<String>,
}
