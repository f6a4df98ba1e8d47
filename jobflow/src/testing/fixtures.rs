//! Test fixtures.

use crate::context::ActionContext;

/// Returns a first-attempt context on the `test` queue.
#[must_use]
pub fn test_action_context() -> ActionContext {
    ActionContext::new("job-test", "test", "test-job", 1, "worker-test")
}

/// Returns a context for a specific delivery attempt of a fan-out sibling.
#[must_use]
pub fn test_delivery_context(job_id: &str, attempt: u32, parent_id: &str) -> ActionContext {
    ActionContext::new(job_id, "test", "test-job", attempt, "worker-test").with_parent_id(parent_id)
}
