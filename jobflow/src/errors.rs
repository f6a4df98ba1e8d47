//! Error taxonomy for job execution.
//!
//! Every failure that crosses an action boundary is converted into a
//! [`JobError`]: a structured, serializable value carrying a [`ErrorKind`]
//! and a [`Severity`]. The worker runtime decides retry versus terminal
//! failure from the kind alone; lower layers only classify and enrich.
//!
//! Setup-time problems (unknown actions, bad configuration, store or queue
//! plumbing) are reported as [`JobflowError`] and map onto the taxonomy via
//! `From<JobflowError> for JobError`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::ActionContext;

/// Convenience alias for results carrying a [`JobError`].
pub type JobResult<T> = Result<T, JobError>;

/// The category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input. Never retried.
    Validation,
    /// A downstream dependency is unavailable or erroring.
    ExternalService,
    /// The persistence layer rejected or failed an operation.
    Database,
    /// A collaborator could not parse its input.
    Parsing,
    /// An operation exceeded its time budget.
    Timeout,
    /// The worker is wired incorrectly (unknown action, missing family).
    /// Never retried.
    Configuration,
    /// Uncaught, unclassified failure.
    Unknown,
}

impl ErrorKind {
    /// Returns true if failures of this kind may succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Validation | Self::Configuration)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::ExternalService => write!(f, "external_service"),
            Self::Database => write!(f, "database"),
            Self::Parsing => write!(f, "parsing"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// How urgently a failure needs operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected, self-healing noise.
    Low,
    /// Worth recording; usually bad input.
    Medium,
    /// A dependency is misbehaving.
    High,
    /// Unclassified failure that needs triage.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Structured failure value produced at every failure boundary.
///
/// A `JobError` is never mutated in place; enrichment consumes the value and
/// returns a new one with job, queue and attempt metadata filled in.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct JobError {
    /// Human-readable description.
    pub message: String,
    /// Failure category.
    pub kind: ErrorKind,
    /// Operator urgency.
    pub severity: Severity,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
    /// Job the failure belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Queue the job was consumed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    /// Delivery attempt on which the failure happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Additional diagnostic fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl JobError {
    /// Creates a new error with an explicit kind and severity.
    #[must_use]
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            severity,
            timestamp: Utc::now(),
            job_id: None,
            queue_name: None,
            retry_count: None,
            context: serde_json::Map::new(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, Severity::Medium, message)
    }

    /// Creates an external-service error.
    #[must_use]
    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, Severity::High, message)
    }

    /// Creates a database error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, Severity::High, message)
    }

    /// Creates a parsing error.
    #[must_use]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parsing, Severity::Medium, message)
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, Severity::High, message)
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, Severity::High, message)
    }

    /// Creates an unknown error, logged at critical severity.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, Severity::Critical, message)
    }

    /// Returns true if the error kind permits another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Sets the job ID unless one is already present.
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        if self.job_id.is_none() {
            self.job_id = Some(job_id.into());
        }
        self
    }

    /// Sets the queue name unless one is already present.
    #[must_use]
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        if self.queue_name.is_none() {
            self.queue_name = Some(queue_name.into());
        }
        self
    }

    /// Sets the attempt number unless one is already present.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        if self.retry_count.is_none() {
            self.retry_count = Some(retry_count);
        }
        self
    }

    /// Adds a context entry, keeping any existing value for the key.
    #[must_use]
    pub fn with_context_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Fills job, queue and attempt metadata from an action context.
    #[must_use]
    pub fn with_action_context(self, ctx: &ActionContext) -> Self {
        let mut enriched = self
            .with_job_id(&ctx.job_id)
            .with_queue_name(&ctx.queue_name)
            .with_retry_count(ctx.attempt)
            .with_context_entry("operation", ctx.operation.as_str())
            .with_context_entry("worker", ctx.worker_name.as_str());
        if let Some(parent_id) = &ctx.parent_id {
            enriched = enriched.with_context_entry("parent_id", parent_id.as_str());
        }
        enriched
    }

    /// Reclassifies the error as a validation failure, keeping its metadata.
    #[must_use]
    pub fn into_validation(mut self) -> Self {
        self.kind = ErrorKind::Validation;
        self.severity = self.severity.min(Severity::Medium);
        self
    }
}

/// Errors raised while wiring or operating the worker, outside a job.
#[derive(Debug, Error)]
pub enum JobflowError {
    /// No factory is registered for the action name.
    #[error("Action not registered: {name}")]
    UnknownAction {
        /// The requested action name.
        name: String,
    },

    /// No pipeline builder is registered for the job family.
    #[error("Job family not registered: {family}")]
    UnknownJobFamily {
        /// The requested job family.
        family: String,
    },

    /// A configuration value failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration sources could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The completion counter store failed.
    #[error("Completion store error: {0}")]
    Store(String),

    /// The queue transport failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobflowError {
    /// Creates an unknown action error.
    #[must_use]
    pub fn unknown_action(name: impl Into<String>) -> Self {
        Self::UnknownAction { name: name.into() }
    }

    /// Creates an unknown job family error.
    #[must_use]
    pub fn unknown_job_family(family: impl Into<String>) -> Self {
        Self::UnknownJobFamily {
            family: family.into(),
        }
    }
}

impl From<JobflowError> for JobError {
    fn from(err: JobflowError) -> Self {
        let message = err.to_string();
        match err {
            JobflowError::UnknownAction { .. }
            | JobflowError::UnknownJobFamily { .. }
            | JobflowError::InvalidConfig(_)
            | JobflowError::Config(_) => Self::configuration(message),
            JobflowError::Store(_) | JobflowError::Queue(_) => Self::external_service(message),
            JobflowError::Serialization(_) => Self::validation(message),
        }
    }
}

/// Converts an arbitrary failure into a [`JobError`].
///
/// Structured errors pass through untouched. Setup errors are mapped onto
/// the taxonomy. Anything else becomes `Unknown` at `Critical` severity with
/// the full cause chain as its message.
#[must_use]
pub fn classify_error(raw: anyhow::Error) -> JobError {
    let raw = match raw.downcast::<JobError>() {
        Ok(job_error) => return job_error,
        Err(raw) => raw,
    };
    match raw.downcast::<JobflowError>() {
        Ok(setup_error) => setup_error.into(),
        Err(raw) => JobError::unknown(format!("{raw:#}")),
    }
}

/// Checks that every required field is present in a job payload.
///
/// A field counts as missing when it is absent, `null`, or an empty string.
/// Returns `None` when the payload is structurally valid.
#[must_use]
pub fn validate_job_data(payload: &serde_json::Value, required_fields: &[&str]) -> Option<JobError> {
    let Some(object) = payload.as_object() else {
        return Some(JobError::validation("Job data must be a JSON object"));
    };

    let missing: Vec<&str> = required_fields
        .iter()
        .copied()
        .filter(|field| match object.get(*field) {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .collect();

    if missing.is_empty() {
        None
    } else {
        Some(
            JobError::validation(format!("Missing required fields: {}", missing.join(", ")))
                .with_context_entry("missing_fields", missing),
        )
    }
}

/// Logs a job error at a level matching its severity.
pub fn log_error(error: &JobError) {
    let job_id = error.job_id.as_deref().unwrap_or("-");
    let queue = error.queue_name.as_deref().unwrap_or("-");
    let attempt = error.retry_count.unwrap_or(0);
    let context = serde_json::Value::Object(error.context.clone());

    match error.severity {
        Severity::Low => tracing::debug!(
            job_id, queue, attempt, kind = %error.kind, context = %context,
            "Job error: {}", error.message
        ),
        Severity::Medium => tracing::info!(
            job_id, queue, attempt, kind = %error.kind, context = %context,
            "Job error: {}", error.message
        ),
        Severity::High => tracing::warn!(
            job_id, queue, attempt, kind = %error.kind, context = %context,
            "Job error: {}", error.message
        ),
        Severity::Critical => tracing::error!(
            job_id, queue, attempt, kind = %error.kind, context = %context,
            "Job error: {}", error.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_raw_error_is_unknown_critical() {
        let err = classify_error(anyhow::anyhow!("db down"));

        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.severity, Severity::Critical);
        assert_eq!(err.message, "db down");
    }

    #[test]
    fn test_structured_error_passes_through() {
        let original = JobError::external_service("parser offline").with_job_id("job-1");
        let err = classify_error(anyhow::Error::new(original.clone()));

        assert_eq!(err, original);
    }

    #[test]
    fn test_cause_chain_is_preserved() {
        let raw = anyhow::anyhow!("connection refused").context("saving note");
        let err = classify_error(raw);

        assert_eq!(err.message, "saving note: connection refused");
    }

    #[test]
    fn test_setup_error_maps_to_configuration() {
        let err = classify_error(anyhow::Error::new(JobflowError::unknown_action("nope")));

        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validate_job_data_missing_field() {
        let err = validate_job_data(&serde_json::json!({}), &["noteId"]);

        let err = err.unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("noteId"));
    }

    #[test]
    fn test_validate_job_data_present_field() {
        assert!(validate_job_data(&serde_json::json!({"noteId": "x"}), &["noteId"]).is_none());
    }

    #[test]
    fn test_validate_job_data_null_and_empty_are_missing() {
        let payload = serde_json::json!({"noteId": null, "content": ""});
        let err = validate_job_data(&payload, &["noteId", "content"]).unwrap();

        assert_eq!(err.message, "Missing required fields: noteId, content");
    }

    #[test]
    fn test_validate_job_data_non_object() {
        let err = validate_job_data(&serde_json::json!([1, 2]), &[]).unwrap();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_enrichment_keeps_first_values() {
        let err = JobError::database("write failed")
            .with_job_id("first")
            .with_job_id("second")
            .with_retry_count(2)
            .with_retry_count(3);

        assert_eq!(err.job_id.as_deref(), Some("first"));
        assert_eq!(err.retry_count, Some(2));
    }

    #[test]
    fn test_into_validation_caps_severity() {
        let err = JobError::unknown("bad shape").into_validation();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.severity, Severity::Medium);
    }

    #[test]
    fn test_kind_retryability() {
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert!(ErrorKind::ExternalService.is_retryable());
        assert!(ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_job_error_serialization() {
        let err = JobError::parsing("unreadable line").with_queue_name("ingredient");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "parsing");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["queue_name"], "ingredient");
        assert!(json.get("job_id").is_none());
    }

    #[test]
    fn test_log_error_does_not_panic() {
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            log_error(&JobError::new(ErrorKind::Unknown, severity, "boom"));
        }
    }
}
