//! Status broadcaster trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

use super::StatusEvent;

/// Trait for status broadcast transports (websocket hub, message bus, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusBroadcaster: Send + Sync {
    /// Publishes an event.
    async fn broadcast(&self, event: StatusEvent) -> anyhow::Result<()>;
}

/// Publishes an event, logging and discarding any failure.
pub async fn broadcast_best_effort(broadcaster: &dyn StatusBroadcaster, event: StatusEvent) {
    let parent_id = event.parent_id.clone();
    let status = event.status;
    if let Err(e) = broadcaster.broadcast(event).await {
        warn!(
            parent_id = %parent_id,
            status = %status,
            error = %e,
            "Status broadcast failed"
        );
    }
}

/// A broadcaster that discards all events.
///
/// Used as the default when no transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpBroadcaster;

#[async_trait]
impl StatusBroadcaster for NoOpBroadcaster {
    async fn broadcast(&self, _event: StatusEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A broadcaster that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingBroadcaster {
    level: Level,
}

impl Default for LoggingBroadcaster {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingBroadcaster {
    /// Creates a new logging broadcaster with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging broadcaster.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl StatusBroadcaster for LoggingBroadcaster {
    async fn broadcast(&self, event: StatusEvent) -> anyhow::Result<()> {
        if self.level == Level::DEBUG {
            debug!(
                parent_id = %event.parent_id,
                entity_id = ?event.entity_id,
                status = %event.status,
                current = ?event.current_count,
                total = ?event.total_count,
                "[{}] {}", event.context, event.message
            );
        } else {
            info!(
                parent_id = %event.parent_id,
                entity_id = ?event.entity_id,
                status = %event.status,
                current = ?event.current_count,
                total = ?event.total_count,
                "[{}] {}", event.context, event.message
            );
        }
        Ok(())
    }
}

/// A collecting broadcaster for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingBroadcaster {
    events: parking_lot::RwLock<Vec<StatusEvent>>,
}

impl CollectingBroadcaster {
    /// Creates a new collecting broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events for a parent.
    #[must_use]
    pub fn events_for(&self, parent_id: &str) -> Vec<StatusEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.parent_id == parent_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatusBroadcaster for CollectingBroadcaster {
    async fn broadcast(&self, event: StatusEvent) -> anyhow::Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}
