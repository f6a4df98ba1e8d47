//! Core domain model types for jobflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The accumulating job state threaded through a pipeline
//! - The processing status reported to status broadcasters

mod state;
mod status;

pub use state::JobState;
pub use status::ProcessingStatus;
