//! Status event payload.

use serde::{Deserialize, Serialize};

use crate::core::ProcessingStatus;

/// A progress update about a parent document or one of its entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// The parent document (e.g. the note).
    pub parent_id: String,
    /// The entity within the parent (e.g. an ingredient line).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Current status.
    pub status: ProcessingStatus,
    /// Human-readable message.
    pub message: String,
    /// Short label for the step that produced the event.
    pub context: String,
    /// Siblings finished so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u32>,
    /// Siblings expected in total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u32>,
    /// Nesting depth for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent_level: Option<u8>,
    /// Extra structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StatusEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        parent_id: impl Into<String>,
        status: ProcessingStatus,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: parent_id.into(),
            entity_id: None,
            status,
            message: message.into(),
            context: context.into(),
            current_count: None,
            total_count: None,
            indent_level: None,
            metadata: None,
        }
    }

    /// Creates a `Processing` event.
    #[must_use]
    pub fn processing(
        parent_id: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(parent_id, ProcessingStatus::Processing, context, message)
    }

    /// Creates a `Completed` event.
    #[must_use]
    pub fn completed(
        parent_id: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(parent_id, ProcessingStatus::Completed, context, message)
    }

    /// Creates a `Failed` event.
    #[must_use]
    pub fn failed(
        parent_id: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(parent_id, ProcessingStatus::Failed, context, message)
    }

    /// Sets the entity ID.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Sets the progress counts.
    #[must_use]
    pub fn with_progress(mut self, current: u32, total: u32) -> Self {
        self.current_count = Some(current);
        self.total_count = Some(total);
        self
    }

    /// Sets only the total count.
    #[must_use]
    pub fn with_total(mut self, total: u32) -> Self {
        self.total_count = Some(total);
        self
    }

    /// Sets the indent level.
    #[must_use]
    pub fn with_indent_level(mut self, level: u8) -> Self {
        self.indent_level = Some(level);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_serializes_camel_case() {
        let event = StatusEvent::processing("note-1", "ingredients", "3/5 ingredients")
            .with_entity_id("line-2")
            .with_progress(3, 5)
            .with_indent_level(1);

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "parentId": "note-1",
                "entityId": "line-2",
                "status": "PROCESSING",
                "message": "3/5 ingredients",
                "context": "ingredients",
                "currentCount": 3,
                "totalCount": 5,
                "indentLevel": 1
            })
        );
    }

    #[test]
    fn test_failed_constructor() {
        let event = StatusEvent::failed("note-1", "categorization", "boom");
        assert_eq!(event.status, ProcessingStatus::Failed);
        assert!(event.total_count.is_none());
    }
}
