//! # Jobflow
//!
//! Queue-driven job pipelines with fan-out/fan-in completion tracking.
//!
//! A worker consumes jobs from named queues, builds the action pipeline
//! registered for the job's family and runs it sequentially, merging each
//! action's output into the job state. Failures are classified into a fixed
//! taxonomy that decides between redelivery and terminal failure. Jobs that
//! fan out into siblings use the completion coordinator to detect the last
//! sibling exactly once and trigger the downstream job.
//!
//! - **Actions and pipelines**: named, registry-built units of work
//! - **Error taxonomy**: classification, enrichment and retry decisions
//! - **Completion coordinator**: race-free "last sibling" detection
//! - **Worker runtime**: bounded concurrency with graceful shutdown
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jobflow::prelude::*;
//!
//! let config = WorkerConfig::load(None)?;
//! let queue = Arc::new(InMemoryQueue::from_config(&config));
//! let deps = RecipeDeps::new(
//!     Arc::new(InMemoryNoteRepository::new()),
//!     queue.clone(),
//!     Arc::new(InMemoryCompletionStore::new()),
//!     Arc::new(LoggingBroadcaster::default()),
//! )?
//! .with_claim_lease(config.visibility_timeout());
//! let worker = Arc::new(recipe_worker(config, Arc::new(deps))?);
//!
//! worker.run(queue, ShutdownSignal::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod health;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod recipe;
pub mod retry;
pub mod testing;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{Action, ActionRegistry, FnAction};
    pub use crate::broadcast::{
        CollectingBroadcaster, LoggingBroadcaster, NoOpBroadcaster, StatusBroadcaster, StatusEvent,
    };
    pub use crate::config::WorkerConfig;
    pub use crate::context::ActionContext;
    pub use crate::coordinator::{
        CompletionCoordinator, CompletionStore, DownstreamTrigger, InMemoryCompletionStore,
        SiblingOutcome,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::coordinator::SqliteCompletionStore;
    pub use crate::core::{JobState, ProcessingStatus};
    pub use crate::errors::{classify_error, ErrorKind, JobError, JobResult, JobflowError, Severity};
    pub use crate::health::HealthCheck;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Pipeline, PipelineExecutor};
    pub use crate::queue::{EnqueueOptions, InMemoryQueue, JobQueue};
    pub use crate::recipe::{recipe_worker, InMemoryNoteRepository, RecipeDeps};
    pub use crate::retry::{BackoffStrategy, RetryPolicy};
    pub use crate::worker::{DeliveryOutcome, JobFamily, ShutdownSignal, WorkerRuntime};
    pub use std::sync::Arc;
}
