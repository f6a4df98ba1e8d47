//! Pipeline type and builder functions.

use std::fmt;
use std::sync::Arc;

use crate::actions::{Action, ActionRegistry};
use crate::core::JobState;
use crate::errors::JobflowError;

/// Per job-family function returning the ordered actions for a payload.
///
/// Builders may vary the list with the payload, e.g. omitting a trailing
/// scheduling action when the payload asks to skip follow-up work.
pub type PipelineBuilderFn<D> =
    Arc<dyn Fn(&JobState, &ActionRegistry<D>) -> Result<Pipeline<D>, JobflowError> + Send + Sync>;

/// An ordered sequence of actions, immutable once built.
pub struct Pipeline<D: Send + Sync + ?Sized> {
    family: String,
    actions: Vec<Arc<dyn Action<D>>>,
}

impl<D: Send + Sync + ?Sized> Pipeline<D> {
    /// Creates an empty pipeline for a job family.
    #[must_use]
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            actions: Vec::new(),
        }
    }

    /// Appends an action.
    #[must_use]
    pub fn with_action(mut self, action: Arc<dyn Action<D>>) -> Self {
        self.actions.push(action);
        self
    }

    /// Builds a pipeline by resolving each name through the registry.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::UnknownAction`] for the first unregistered name.
    pub fn from_names(
        family: impl Into<String>,
        registry: &ActionRegistry<D>,
        names: &[&str],
    ) -> Result<Self, JobflowError> {
        let actions = names
            .iter()
            .map(|name| registry.create(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            family: family.into(),
            actions,
        })
    }

    /// Returns the job family.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Returns the actions in execution order.
    #[must_use]
    pub fn actions(&self) -> &[Arc<dyn Action<D>>] {
        &self.actions
    }

    /// Returns the action names in execution order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Returns the number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if the pipeline has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<D: Send + Sync + ?Sized> fmt::Debug for Pipeline<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("family", &self.family)
            .field("actions", &self.action_names())
            .finish()
    }
}
