//! Job model and lifecycle.
//!
//! - `model` — persisted `Job` row, `JobState`, enqueue payload
//! - `transitions` — pure outcome resolution and exponential backoff

pub mod model;
pub mod transitions;

pub use model::{Job, JobState, NewJob};
pub use transitions::{ExecOutcome, Resolution, RetryPolicy, backoff_delay, resolve_outcome};
