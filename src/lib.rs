//! jobq — a durable, multi-process job queue over a shared SQLite store.
//!
//! Clients enqueue shell-command jobs; independent worker processes poll the
//! store, atomically claim jobs, execute them, and record outcomes with
//! exponential retry backoff and a dead-letter queue for permanent failures.

pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod store;
pub mod worker;
