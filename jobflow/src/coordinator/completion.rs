//! Completion coordinator.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{CompletionProgress, CompletionStore, ExpectedTotalOutcome, SiblingOutcome};
use crate::broadcast::{broadcast_best_effort, StatusBroadcaster, StatusEvent};
use crate::errors::{JobError, JobResult};

/// Enqueues the downstream job once every sibling has finished.
#[async_trait]
pub trait DownstreamTrigger: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Enqueues the downstream job for a parent.
    async fn fire(&self, parent_id: &str) -> anyhow::Result<()>;
}

/// How long a trigger claim is honored by default.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Race-free "is this the last sibling?" detection over a [`CompletionStore`].
#[derive(Clone)]
pub struct CompletionCoordinator {
    store: Arc<dyn CompletionStore>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    claim_lease: Duration,
}

impl std::fmt::Debug for CompletionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionCoordinator")
            .field("claim_lease", &self.claim_lease)
            .finish_non_exhaustive()
    }
}

impl CompletionCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(store: Arc<dyn CompletionStore>, broadcaster: Arc<dyn StatusBroadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Sets how long a claim holder has to enqueue before another sibling
    /// may take the claim over.
    #[must_use]
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CompletionStore> {
        &self.store
    }

    /// Records how many siblings a parent fanned out into.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero total; a parent with no
    /// siblings must schedule its downstream job directly.
    pub async fn set_expected_total(&self, parent_id: &str, total: u32) -> JobResult<ExpectedTotalOutcome> {
        if total == 0 {
            return Err(JobError::validation(format!(
                "Expected sibling total for {parent_id} must be positive"
            )));
        }

        let outcome = self.store.set_expected_total(parent_id, total).await?;
        match outcome {
            ExpectedTotalOutcome::Created => {
                debug!(parent_id, total, "Completion counter created");
            }
            ExpectedTotalOutcome::Unchanged => {
                debug!(parent_id, total, "Completion counter already set");
            }
            ExpectedTotalOutcome::Conflict { previous } => {
                warn!(parent_id, previous, total, "Conflicting expected total; keeping latest");
            }
        }
        Ok(outcome)
    }

    /// Records the expected total and fires the trigger if siblings already
    /// recorded meet a lowered total.
    ///
    /// # Errors
    ///
    /// Same as [`set_expected_total`](Self::set_expected_total) and
    /// [`fire_downstream`](Self::fire_downstream).
    pub async fn expect_siblings(
        &self,
        parent_id: &str,
        total: u32,
        trigger: &dyn DownstreamTrigger,
    ) -> JobResult<ExpectedTotalOutcome> {
        let outcome = self.set_expected_total(parent_id, total).await?;
        if let ExpectedTotalOutcome::Conflict { .. } = outcome {
            let complete = self
                .store
                .get(parent_id)
                .await?
                .is_some_and(|counter| counter.is_complete());
            if complete {
                info!(parent_id, total, "Lowered total already met by recorded siblings");
                self.fire_downstream(parent_id, trigger).await?;
            }
        }
        Ok(outcome)
    }

    /// Records one finished sibling.
    ///
    /// # Errors
    ///
    /// Propagates store failures (`ExternalService`) and unknown parents
    /// (`Validation`).
    pub async fn increment_completion(
        &self,
        parent_id: &str,
        member_id: &str,
        outcome: SiblingOutcome,
    ) -> JobResult<CompletionProgress> {
        let progress = self.store.atomic_increment(parent_id, member_id, outcome).await?;
        if progress.duplicate {
            info!(
                parent_id,
                member_id,
                completed = progress.completed_count,
                total = progress.total_expected,
                "Sibling completion already recorded"
            );
        } else {
            debug!(
                parent_id,
                member_id,
                outcome = outcome.as_str(),
                completed = progress.completed_count,
                total = progress.total_expected,
                is_last = progress.is_last,
                "Sibling completion recorded"
            );
        }
        Ok(progress)
    }

    /// Records a sibling and fires the downstream trigger if it was the last.
    ///
    /// Any sibling that finds the parent complete tries the trigger, not only
    /// the one that reached the total. A redelivered sibling therefore retries
    /// after a failed enqueue or an abandoned claim, and a total lowered below
    /// the recorded count still fires. The atomic claim keeps it to one enqueue.
    ///
    /// # Errors
    ///
    /// Returns the increment error, or an `ExternalService` error when the
    /// downstream enqueue fails so the sibling is redelivered.
    pub async fn record_completion(
        &self,
        parent_id: &str,
        member_id: &str,
        outcome: SiblingOutcome,
        trigger: &dyn DownstreamTrigger,
    ) -> JobResult<CompletionProgress> {
        let progress = self.increment_completion(parent_id, member_id, outcome).await?;
        if progress.is_complete() {
            self.fire_downstream(parent_id, trigger).await?;
        }
        Ok(progress)
    }

    /// Claims the trigger and enqueues the downstream job.
    ///
    /// Returns false if the trigger already fired or another caller holds a
    /// live claim.
    ///
    /// # Errors
    ///
    /// On enqueue failure the claim is released, a `Failed` status is
    /// broadcast and an `ExternalService` error is returned.
    pub async fn fire_downstream(&self, parent_id: &str, trigger: &dyn DownstreamTrigger) -> JobResult<bool> {
        if !self.store.claim_trigger(parent_id, self.claim_lease).await? {
            debug!(parent_id, trigger = trigger.name(), "Downstream trigger already claimed");
            return Ok(false);
        }

        match trigger.fire(parent_id).await {
            Ok(()) => {
                self.store.mark_fired(parent_id).await?;
                info!(parent_id, trigger = trigger.name(), "All siblings finished; downstream job enqueued");
                Ok(true)
            }
            Err(e) => {
                if let Err(release_err) = self.store.release_trigger(parent_id).await {
                    warn!(parent_id, error = %release_err, "Failed to release downstream trigger claim");
                }
                error!(parent_id, trigger = trigger.name(), error = %e, "Downstream enqueue failed");
                broadcast_best_effort(
                    self.broadcaster.as_ref(),
                    StatusEvent::failed(
                        parent_id,
                        trigger.name(),
                        format!("Failed to schedule {}: {e}", trigger.name()),
                    ),
                )
                .await;
                Err(JobError::external_service(format!(
                    "Downstream enqueue '{}' failed for {parent_id}: {e:#}",
                    trigger.name()
                ))
                .with_context_entry("parent_id", parent_id))
            }
        }
    }
}
