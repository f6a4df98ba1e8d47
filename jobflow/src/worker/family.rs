//! Job family registration.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::actions::ActionRegistry;
use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::{JobError, JobflowError};
use crate::pipeline::{Pipeline, PipelineBuilderFn};

/// Runs when a job of a family fails terminally (rejected or exhausted).
///
/// Fan-out siblings use this to record a `Failed` completion so their
/// parent still finishes.
#[async_trait]
pub trait TerminalFailureHook<D: Send + Sync + ?Sized>: Send + Sync {
    /// Handles the terminal failure. `payload` is the raw job payload.
    async fn on_terminal_failure(
        &self,
        payload: &serde_json::Value,
        deps: &D,
        ctx: &ActionContext,
        error: &JobError,
    ) -> anyhow::Result<()>;
}

/// Everything the worker needs to process one job name.
pub struct JobFamily<D: Send + Sync + ?Sized> {
    name: String,
    queue: String,
    required_fields: Vec<String>,
    parent_key: Option<String>,
    builder: PipelineBuilderFn<D>,
    terminal_hook: Option<Arc<dyn TerminalFailureHook<D>>>,
}

impl<D: Send + Sync + ?Sized> Clone for JobFamily<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            queue: self.queue.clone(),
            required_fields: self.required_fields.clone(),
            parent_key: self.parent_key.clone(),
            builder: Arc::clone(&self.builder),
            terminal_hook: self.terminal_hook.clone(),
        }
    }
}

impl<D: Send + Sync + ?Sized> JobFamily<D> {
    /// Creates a family whose pipeline is chosen by `builder`.
    pub fn new<F>(name: impl Into<String>, queue: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&JobState, &ActionRegistry<D>) -> Result<Pipeline<D>, JobflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            queue: queue.into(),
            required_fields: Vec::new(),
            parent_key: None,
            builder: Arc::new(builder),
            terminal_hook: None,
        }
    }

    /// Creates a family with a fixed list of action names.
    pub fn fixed(name: impl Into<String>, queue: impl Into<String>, actions: &[&str]) -> Self
    where
        D: 'static,
    {
        let name = name.into();
        let family = name.clone();
        let actions: Vec<String> = actions.iter().map(|a| (*a).to_string()).collect();
        Self::new(name, queue, move |_payload, registry| {
            let names: Vec<&str> = actions.iter().map(String::as_str).collect();
            Pipeline::from_names(family.clone(), registry, &names)
        })
    }

    /// Sets the payload fields that must be present.
    #[must_use]
    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Sets the payload key holding the parent document ID.
    #[must_use]
    pub fn with_parent_key(mut self, key: impl Into<String>) -> Self {
        self.parent_key = Some(key.into());
        self
    }

    /// Sets the terminal failure hook.
    #[must_use]
    pub fn with_terminal_hook(mut self, hook: Arc<dyn TerminalFailureHook<D>>) -> Self {
        self.terminal_hook = Some(hook);
        self
    }

    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the queue name.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Returns the required payload fields.
    #[must_use]
    pub fn required_fields(&self) -> Vec<&str> {
        self.required_fields.iter().map(String::as_str).collect()
    }

    /// Returns the parent key.
    #[must_use]
    pub fn parent_key(&self) -> Option<&str> {
        self.parent_key.as_deref()
    }

    /// Returns the terminal failure hook.
    #[must_use]
    pub fn terminal_hook(&self) -> Option<&Arc<dyn TerminalFailureHook<D>>> {
        self.terminal_hook.as_ref()
    }

    /// Builds the pipeline for a payload.
    ///
    /// # Errors
    ///
    /// Propagates builder failures such as unknown action names.
    pub fn build(&self, payload: &JobState, registry: &ActionRegistry<D>) -> Result<Pipeline<D>, JobflowError> {
        (self.builder)(payload, registry)
    }
}

impl<D: Send + Sync + ?Sized> fmt::Debug for JobFamily<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFamily")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("required_fields", &self.required_fields)
            .field("parent_key", &self.parent_key)
            .field("terminal_hook", &self.terminal_hook.is_some())
            .finish_non_exhaustive()
    }
}
