//! Process-local completion store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    lease_expired, CompletionCounter, CompletionProgress, CompletionStore, ExpectedTotalOutcome,
    SiblingOutcome, TriggerState,
};
use crate::errors::{JobError, JobResult};

#[derive(Debug)]
struct Slot {
    counter: CompletionCounter,
    members: HashSet<String>,
}

/// In-memory completion store.
///
/// Each operation holds the shard lock of its parent for its whole
/// read-compare-write, so concurrent increments within one process never
/// lose an update. Not shared across processes.
#[derive(Debug, Default)]
pub struct InMemoryCompletionStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryCompletionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no live counters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn unknown_parent(parent_id: &str) -> JobError {
    JobError::validation(format!("No completion counter for parent {parent_id}"))
        .with_context_entry("parent_id", parent_id)
}

#[async_trait]
impl CompletionStore for InMemoryCompletionStore {
    async fn set_expected_total(&self, parent_id: &str, total: u32) -> JobResult<ExpectedTotalOutcome> {
        match self.slots.entry(parent_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    counter: CompletionCounter::new(parent_id, total),
                    members: HashSet::new(),
                });
                Ok(ExpectedTotalOutcome::Created)
            }
            Entry::Occupied(mut occupied) => {
                let counter = &mut occupied.get_mut().counter;
                if counter.total_expected == total {
                    Ok(ExpectedTotalOutcome::Unchanged)
                } else {
                    let previous = counter.total_expected;
                    counter.total_expected = total;
                    Ok(ExpectedTotalOutcome::Conflict { previous })
                }
            }
        }
    }

    async fn atomic_increment(
        &self,
        parent_id: &str,
        member_id: &str,
        outcome: SiblingOutcome,
    ) -> JobResult<CompletionProgress> {
        let mut slot = self
            .slots
            .get_mut(parent_id)
            .ok_or_else(|| unknown_parent(parent_id))?;

        if !slot.members.insert(member_id.to_string()) {
            let counter = &slot.counter;
            return Ok(CompletionProgress {
                completed_count: counter.completed_count,
                total_expected: counter.total_expected,
                is_last: false,
                duplicate: true,
                failed: counter.failed,
            });
        }

        let counter = &mut slot.counter;
        counter.completed_count += 1;
        if outcome == SiblingOutcome::Failed {
            counter.failed = true;
        }

        Ok(CompletionProgress {
            completed_count: counter.completed_count,
            total_expected: counter.total_expected,
            is_last: counter.completed_count == counter.total_expected,
            duplicate: false,
            failed: counter.failed,
        })
    }

    async fn claim_trigger(&self, parent_id: &str, lease: Duration) -> JobResult<bool> {
        let mut slot = self
            .slots
            .get_mut(parent_id)
            .ok_or_else(|| unknown_parent(parent_id))?;
        let counter = &mut slot.counter;
        if !counter.is_complete() {
            return Ok(false);
        }

        let now = Utc::now();
        let claimable = match (counter.trigger, counter.claimed_at) {
            (TriggerState::Pending, _) | (TriggerState::Claimed, None) => true,
            (TriggerState::Claimed, Some(claimed_at)) => {
                let expired = lease_expired(claimed_at, lease, now);
                if expired {
                    warn!(parent_id, %claimed_at, "Taking over expired trigger claim");
                }
                expired
            }
            (TriggerState::Fired, _) => false,
        };
        if claimable {
            counter.trigger = TriggerState::Claimed;
            counter.claimed_at = Some(now);
        }
        Ok(claimable)
    }

    async fn release_trigger(&self, parent_id: &str) -> JobResult<()> {
        if let Some(mut slot) = self.slots.get_mut(parent_id) {
            if slot.counter.trigger == TriggerState::Claimed {
                slot.counter.trigger = TriggerState::Pending;
                slot.counter.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn mark_fired(&self, parent_id: &str) -> JobResult<()> {
        match self.slots.get_mut(parent_id) {
            Some(mut slot) => {
                slot.counter.trigger = TriggerState::Fired;
                slot.counter.claimed_at = None;
            }
            None => debug!(parent_id, "Counter already archived; nothing to mark fired"),
        }
        Ok(())
    }

    async fn get(&self, parent_id: &str) -> JobResult<Option<CompletionCounter>> {
        Ok(self.slots.get(parent_id).map(|slot| slot.counter.clone()))
    }

    async fn archive(&self, parent_id: &str) -> JobResult<Option<CompletionCounter>> {
        Ok(self.slots.remove(parent_id).map(|(_, slot)| slot.counter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_expected_total_is_idempotent() {
        let store = InMemoryCompletionStore::new();

        assert_eq!(store.set_expected_total("note-1", 5).await.unwrap(), ExpectedTotalOutcome::Created);
        store.atomic_increment("note-1", "a", SiblingOutcome::Succeeded).await.unwrap();
        assert_eq!(store.set_expected_total("note-1", 5).await.unwrap(), ExpectedTotalOutcome::Unchanged);

        let counter = store.get("note-1").await.unwrap().unwrap();
        assert_eq!(counter.completed_count, 1);
        assert_eq!(counter.total_expected, 5);
    }

    #[tokio::test]
    async fn test_conflicting_total_overwrites_without_reset() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 5).await.unwrap();
        store.atomic_increment("note-1", "a", SiblingOutcome::Succeeded).await.unwrap();

        let outcome = store.set_expected_total("note-1", 3).await.unwrap();

        assert_eq!(outcome, ExpectedTotalOutcome::Conflict { previous: 5 });
        let counter = store.get("note-1").await.unwrap().unwrap();
        assert_eq!((counter.completed_count, counter.total_expected), (1, 3));
    }

    #[tokio::test]
    async fn test_sequential_siblings_last_once() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 5).await.unwrap();

        for member in ["l1", "l2", "l3", "l4"] {
            let progress = store
                .atomic_increment("note-1", member, SiblingOutcome::Succeeded)
                .await
                .unwrap();
            assert!(!progress.is_last);
        }
        let last = store
            .atomic_increment("note-1", "l5", SiblingOutcome::Succeeded)
            .await
            .unwrap();

        assert!(last.is_last);
        assert_eq!(last.completed_count, 5);
    }

    #[tokio::test]
    async fn test_duplicate_member_does_not_double_count() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 2).await.unwrap();

        store.atomic_increment("note-1", "l1", SiblingOutcome::Succeeded).await.unwrap();
        let again = store.atomic_increment("note-1", "l1", SiblingOutcome::Succeeded).await.unwrap();

        assert!(again.duplicate);
        assert!(!again.is_last);
        assert_eq!(again.completed_count, 1);
    }

    #[tokio::test]
    async fn test_failed_sibling_counts_and_flags() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 2).await.unwrap();

        store.atomic_increment("note-1", "l1", SiblingOutcome::Failed).await.unwrap();
        let last = store.atomic_increment("note-1", "l2", SiblingOutcome::Succeeded).await.unwrap();

        assert!(last.is_last);
        assert!(last.failed);
    }

    #[tokio::test]
    async fn test_unknown_parent_is_validation() {
        let store = InMemoryCompletionStore::new();
        let err = store
            .atomic_increment("missing", "l1", SiblingOutcome::Succeeded)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_trigger_claim_lifecycle() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 1).await.unwrap();

        assert!(!store.claim_trigger("note-1", LEASE).await.unwrap());
        store.atomic_increment("note-1", "l1", SiblingOutcome::Succeeded).await.unwrap();

        assert!(store.claim_trigger("note-1", LEASE).await.unwrap());
        assert!(!store.claim_trigger("note-1", LEASE).await.unwrap());

        store.release_trigger("note-1").await.unwrap();
        assert!(store.claim_trigger("note-1", LEASE).await.unwrap());

        store.mark_fired("note-1").await.unwrap();
        store.release_trigger("note-1").await.unwrap();
        let counter = store.get("note-1").await.unwrap().unwrap();
        assert_eq!(counter.trigger, TriggerState::Fired);
        assert!(counter.claimed_at.is_none());
        assert!(!store.claim_trigger("note-1", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_claim_is_taken_over() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 1).await.unwrap();
        store.atomic_increment("note-1", "l1", SiblingOutcome::Succeeded).await.unwrap();

        assert!(store.claim_trigger("note-1", LEASE).await.unwrap());
        assert!(!store.claim_trigger("note-1", LEASE).await.unwrap());
        assert!(store.claim_trigger("note-1", Duration::ZERO).await.unwrap());

        let counter = store.get("note-1").await.unwrap().unwrap();
        assert_eq!(counter.trigger, TriggerState::Claimed);
        assert!(counter.claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_fired_after_archive_is_noop() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 1).await.unwrap();
        store.archive("note-1").await.unwrap();

        store.mark_fired("note-1").await.unwrap();
        assert!(store.get("note-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archive_removes_counter() {
        let store = InMemoryCompletionStore::new();
        store.set_expected_total("note-1", 1).await.unwrap();

        let archived = store.archive("note-1").await.unwrap();

        assert_eq!(archived.map(|c| c.parent_id), Some("note-1".to_string()));
        assert!(store.is_empty());
        assert!(store.archive("note-1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_exactly_one_last() {
        for round in 0..20 {
            let store = Arc::new(InMemoryCompletionStore::new());
            let parent = format!("note-{round}");
            store.set_expected_total(&parent, 16).await.unwrap();

            let mut handles = Vec::new();
            for i in 0..16 {
                let store = store.clone();
                let parent = parent.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .atomic_increment(&parent, &format!("line-{i}"), SiblingOutcome::Succeeded)
                        .await
                        .unwrap()
                }));
            }

            let mut lasts = 0;
            for handle in handles {
                if handle.await.unwrap().is_last {
                    lasts += 1;
                }
            }
            assert_eq!(lasts, 1);
        }
    }
}
