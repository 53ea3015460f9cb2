//! Queue processing: backoff policy, per-event retry controller, and the
//! bounded batch runner.

pub mod backoff;
pub mod batch;
pub mod controller;

pub use backoff::BackoffConfig;
pub use batch::{run_batch, BatchConfig, BatchReport};
pub use controller::{process_event, ProcessOutcome};
