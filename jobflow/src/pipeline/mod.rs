//! Pipeline assembly and execution.
//!
//! This module provides:
//! - [`Pipeline`]: an ordered, immutable list of actions built per job
//! - [`PipelineBuilderFn`]: the per-family function that assembles it
//! - [`PipelineExecutor`]: the action wrapper and sequential runner

mod builder;
mod executor;

pub use builder::{Pipeline, PipelineBuilderFn};
pub use executor::PipelineExecutor;
