//! Status broadcasting for progress reporting.
//!
//! Broadcasts are best-effort: callers go through [`broadcast_best_effort`],
//! which logs and swallows failures so a broken transport never blocks or
//! fails a pipeline.

mod event;
mod sink;

pub use event::StatusEvent;
pub use sink::{
    broadcast_best_effort, CollectingBroadcaster, LoggingBroadcaster, NoOpBroadcaster,
    StatusBroadcaster,
};

#[cfg(test)]
pub use sink::MockStatusBroadcaster;
