//! Fan-out/fan-in completion coordination.
//!
//! A parent document fans out into sibling jobs that finish in any order on
//! any worker. Each sibling reports its completion exactly once through an
//! atomic, member-keyed increment; the single increment that observes
//! `completed_count == total_expected` is the last one, and the downstream
//! job is then enqueued behind an atomic trigger claim.
//!
//! Stores:
//! - [`InMemoryCompletionStore`]: process-local, lock-per-shard
//! - [`SqliteCompletionStore`]: durable, shared by worker processes (feature `sqlite`)

mod completion;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use completion::{CompletionCoordinator, DownstreamTrigger, DEFAULT_CLAIM_LEASE};
pub use memory::InMemoryCompletionStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCompletionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::JobResult;

/// How a sibling job finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingOutcome {
    /// The sibling's pipeline succeeded.
    Succeeded,
    /// The sibling failed permanently. It still counts as finished.
    Failed,
}

impl SiblingOutcome {
    /// Returns the storage label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Lifecycle of the downstream trigger for one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Not yet fired.
    #[default]
    Pending,
    /// A caller holds the right to fire until its lease runs out.
    Claimed,
    /// The downstream job was enqueued.
    Fired,
}

impl TriggerState {
    /// Returns the storage label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Fired => "fired",
        }
    }

    /// Parses a storage label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "fired" => Some(Self::Fired),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-parent completion record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCounter {
    /// The parent document.
    pub parent_id: String,
    /// Number of siblings fanned out.
    pub total_expected: u32,
    /// Distinct siblings finished so far.
    pub completed_count: u32,
    /// True once any sibling finished with [`SiblingOutcome::Failed`].
    pub failed: bool,
    /// Downstream trigger state.
    pub trigger: TriggerState,
    /// When the current claim was taken; set while `Claimed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl CompletionCounter {
    /// Creates a fresh counter.
    #[must_use]
    pub fn new(parent_id: impl Into<String>, total_expected: u32) -> Self {
        Self {
            parent_id: parent_id.into(),
            total_expected,
            completed_count: 0,
            failed: false,
            trigger: TriggerState::Pending,
            claimed_at: None,
        }
    }

    /// Returns true once every expected sibling has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_count >= self.total_expected
    }
}

/// Result of one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionProgress {
    /// Post-increment count (current count for a duplicate).
    pub completed_count: u32,
    /// Expected total for the parent.
    pub total_expected: u32,
    /// True for exactly one increment per parent: the one that reached the total.
    pub is_last: bool,
    /// True if this member had already been recorded.
    pub duplicate: bool,
    /// True if any sibling has failed.
    pub failed: bool,
}

impl CompletionProgress {
    /// Returns true once every expected sibling has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_count >= self.total_expected
    }
}

/// Result of recording the expected total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedTotalOutcome {
    /// A new counter was created.
    Created,
    /// The counter already had this total.
    Unchanged,
    /// The counter had a different total, which was overwritten.
    Conflict {
        /// The total that was replaced.
        previous: u32,
    },
}

/// Returns true once a claim taken at `claimed_at` has outlived `lease`.
pub(crate) fn lease_expired(claimed_at: DateTime<Utc>, lease: Duration, now: DateTime<Utc>) -> bool {
    (now - claimed_at).to_std().is_ok_and(|held| held >= lease)
}

/// Durable atomic counter store.
///
/// Every method is a single atomic operation against the store. Failures of
/// the store itself are reported as `ExternalService` errors.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Records the expected sibling count for a parent.
    ///
    /// Repeating the same total leaves the counter untouched. A different
    /// total overwrites the old one without resetting the count.
    async fn set_expected_total(&self, parent_id: &str, total: u32) -> JobResult<ExpectedTotalOutcome>;

    /// Records one finished sibling and returns the post-increment progress.
    ///
    /// Recording the same member twice is a no-op that reports
    /// `duplicate = true` and `is_last = false`. Incrementing a parent with
    /// no counter is a validation error.
    async fn atomic_increment(
        &self,
        parent_id: &str,
        member_id: &str,
        outcome: SiblingOutcome,
    ) -> JobResult<CompletionProgress>;

    /// Moves the trigger to `Claimed` if the counter is complete and the
    /// trigger is `Pending`, or `Claimed` by a holder whose `lease` has run out.
    ///
    /// Returns true for the caller that won the claim.
    async fn claim_trigger(&self, parent_id: &str, lease: Duration) -> JobResult<bool>;

    /// Moves a `Claimed` trigger back to `Pending`.
    async fn release_trigger(&self, parent_id: &str) -> JobResult<()>;

    /// Marks the trigger as `Fired`.
    ///
    /// A missing counter is not an error: it is only archived once the
    /// downstream job has run.
    async fn mark_fired(&self, parent_id: &str) -> JobResult<()>;

    /// Returns a snapshot of the counter.
    async fn get(&self, parent_id: &str) -> JobResult<Option<CompletionCounter>>;

    /// Removes the counter and its members, returning the last snapshot.
    async fn archive(&self, parent_id: &str) -> JobResult<Option<CompletionCounter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_state_labels() {
        for state in [TriggerState::Pending, TriggerState::Claimed, TriggerState::Fired] {
            assert_eq!(TriggerState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TriggerState::parse("bogus"), None);
    }

    #[test]
    fn test_counter_completion() {
        let mut counter = CompletionCounter::new("note-1", 2);
        assert!(!counter.is_complete());

        counter.completed_count = 2;
        assert!(counter.is_complete());
    }

    #[test]
    fn test_lease_expiry() {
        let claimed_at = Utc::now() - chrono::Duration::seconds(10);
        assert!(lease_expired(claimed_at, Duration::from_secs(5), Utc::now()));
        assert!(!lease_expired(claimed_at, Duration::from_secs(60), Utc::now()));
        assert!(!lease_expired(Utc::now() + chrono::Duration::seconds(5), Duration::ZERO, Utc::now()));
    }
}
