//! Testing utilities for jobflow pipelines.
//!
//! This module provides:
//! - Mock actions with recording, failing and slow behavior
//! - Context fixtures

mod fixtures;
mod mocks;

pub use fixtures::{test_action_context, test_delivery_context};
pub use mocks::{FailingAction, RecordingAction, RejectingAction, SlowAction, StaticAction};
