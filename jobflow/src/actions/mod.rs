//! Action trait and implementations.
//!
//! Actions are the units of work a job pipeline is assembled from. Each one
//! receives the accumulated [`JobState`], the shared dependency bundle `D`
//! and the per-delivery [`ActionContext`], and returns the fields it
//! produced.

mod registry;

pub use registry::{ActionFactory, ActionRegistry};

use async_trait::async_trait;
use std::fmt::Debug;

use crate::context::ActionContext;
use crate::core::JobState;
use crate::errors::JobResult;

/// Trait for pipeline actions.
///
/// `D` is the read-only dependency bundle shared by every action of a
/// worker. Actions must not keep per-job state between calls.
#[async_trait]
pub trait Action<D>: Send + Sync + Debug
where
    D: Send + Sync + ?Sized,
{
    /// Returns the stable symbolic name of the action.
    fn name(&self) -> &str;

    /// Checks the input before execution.
    ///
    /// A failure here aborts the pipeline without calling
    /// [`execute`](Action::execute) and is always treated as a validation
    /// error.
    fn validate_input(&self, _input: &JobState) -> JobResult<()> {
        Ok(())
    }

    /// Executes the action.
    ///
    /// Returns only the fields the action produced; the executor merges them
    /// into the accumulated state. Any error may be returned; it is
    /// classified by the caller.
    async fn execute(
        &self,
        input: &JobState,
        deps: &D,
        ctx: &ActionContext,
    ) -> anyhow::Result<JobState>;
}

/// A simple function-based action.
pub struct FnAction<F> {
    name: String,
    func: F,
}

impl<F> FnAction<F> {
    /// Creates a new function-based action.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnAction<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<D, F> Action<D> for FnAction<F>
where
    D: Send + Sync + ?Sized,
    F: Fn(&JobState, &D, &ActionContext) -> anyhow::Result<JobState> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        input: &JobState,
        deps: &D,
        ctx: &ActionContext,
    ) -> anyhow::Result<JobState> {
        (self.func)(input, deps, ctx)
    }
}
