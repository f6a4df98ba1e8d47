//! Queue transport abstraction.
//!
//! The worker consumes [`Delivery`] values from a [`JobQueue`] and settles
//! each one with `complete`, `retry` or `fail`. Redelivery, delay and
//! attempt bookkeeping belong to the transport.

mod memory;

pub use memory::InMemoryQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::errors::{JobError, JobResult};

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID.
    pub id: String,
    /// Queue the job lives on.
    pub queue: String,
    /// Job name; selects the pipeline family.
    pub name: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Idempotency key; a second enqueue with a live key is ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job with a fresh v4 ID.
    #[must_use]
    pub fn new(queue: impl Into<String>, name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            name: name.into(),
            payload,
            dedupe_key: None,
            enqueued_at: Utc::now(),
        }
    }
}

/// Handle returned by an enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// The job ID (the existing one for a deduplicated enqueue).
    pub id: String,
    /// The queue.
    pub queue: String,
    /// True if the enqueue matched a live job and was ignored.
    pub deduplicated: bool,
}

/// Options for an enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Idempotency key.
    pub dedupe_key: Option<String>,
    /// Delay before the job becomes visible.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Sets the dedupe key.
    #[must_use]
    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Sets the delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One delivery of a job to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The job.
    pub job: Job,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Unique per delivery; stale settlements are ignored.
    pub delivery_id: String,
    /// After this instant the transport may redeliver.
    pub deadline: DateTime<Utc>,
}

/// Lifecycle events surfaced by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A job completed.
    Completed {
        /// The job ID.
        job_id: String,
        /// The queue.
        queue: String,
    },
    /// A job failed permanently.
    Failed {
        /// The job ID.
        job_id: String,
        /// The queue.
        queue: String,
        /// The error message.
        error: String,
    },
    /// A transport-level fault not tied to a job attempt.
    Error {
        /// The fault description.
        message: String,
    },
}

/// An at-least-once queue transport.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job.
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> JobResult<JobHandle>;

    /// Takes the next visible job from a queue, if any.
    async fn dequeue(&self, queue: &str) -> JobResult<Option<Delivery>>;

    /// Acknowledges a delivery as completed.
    async fn complete(&self, delivery: &Delivery) -> JobResult<()>;

    /// Returns a delivery to the queue to be redelivered after `delay`.
    async fn retry(&self, delivery: &Delivery, error: &JobError, delay: Duration) -> JobResult<()>;

    /// Moves a delivery to the permanently failed set.
    async fn fail(&self, delivery: &Delivery, error: &JobError) -> JobResult<()>;

    /// Subscribes to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    /// Reports a transport-level fault.
    fn emit_error(&self, message: String);
}

/// Derives a stable idempotency key from its parts.
#[must_use]
pub fn dedupe_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
