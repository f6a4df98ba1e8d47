//! Worker runtime.
//!
//! A worker consumes deliveries from a [`JobQueue`](crate::queue::JobQueue),
//! builds the pipeline registered for the job's family, runs it and settles
//! the delivery according to the retry policy.
//!
//! Per delivery:
//!
//! ```text
//! Received -> Validating -> Executing(1..N) -> Completed
//!                        \-> Rejected                  (validation, configuration)
//!           Executing(i) -> RetryScheduled -> Received (transport redelivers)
//!           Executing(i) -> FailedPermanently          (attempts exhausted)
//! ```

mod family;
mod runtime;
mod shutdown;

pub use family::{JobFamily, TerminalFailureHook};
pub use runtime::{DeliveryOutcome, WorkerRuntime};
pub use shutdown::ShutdownSignal;
