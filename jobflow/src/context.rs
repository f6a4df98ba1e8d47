//! Per-delivery action context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable context shared by every action of one job delivery.
///
/// Created once when the worker receives a delivery and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    /// The job being executed.
    pub job_id: String,
    /// The queue the job was consumed from.
    pub queue_name: String,
    /// The job name (operation) that selected the pipeline.
    pub operation: String,
    /// 1-based delivery attempt.
    pub attempt: u32,
    /// When the worker started this delivery.
    pub started_at: DateTime<Utc>,
    /// Name of the worker executing the job.
    pub worker_name: String,
    /// Parent document the job belongs to.
    ///
    /// Present iff the job family declares a parent key and the payload
    /// carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl ActionContext {
    /// Creates a new context stamped with the current time.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        attempt: u32,
        worker_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            queue_name: queue_name.into(),
            operation: operation.into(),
            attempt,
            started_at: Utc::now(),
            worker_name: worker_name.into(),
            parent_id: None,
        }
    }

    /// Sets the parent document ID.
    #[must_use]
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Returns the parent ID, falling back to the job ID.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(&self.job_id)
    }

    /// Milliseconds elapsed since the delivery started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Returns true for a redelivery.
    #[must_use]
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = ActionContext::new("job-1", "note", "process-note", 1, "worker-a");

        assert_eq!(ctx.job_id, "job-1");
        assert_eq!(ctx.queue_name, "note");
        assert_eq!(ctx.operation, "process-note");
        assert!(!ctx.is_redelivery());
        assert!(ctx.parent_id.is_none());
    }

    #[test]
    fn test_correlation_id_prefers_parent() {
        let ctx = ActionContext::new("job-1", "note", "process-note", 2, "worker-a");
        assert_eq!(ctx.correlation_id(), "job-1");

        let ctx = ctx.with_parent_id("note-1");
        assert_eq!(ctx.correlation_id(), "note-1");
        assert!(ctx.is_redelivery());
    }

    #[test]
    fn test_context_serialization_skips_missing_parent() {
        let ctx = ActionContext::new("job-1", "note", "process-note", 1, "worker-a");
        let json = serde_json::to_value(&ctx).unwrap();

        assert!(json.get("parent_id").is_none());
        assert_eq!(json["attempt"], 1);
    }
}
