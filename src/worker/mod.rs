//! Worker subsystem.
//!
//! - `runner` — the polling claim/execute/record loop
//! - `shutdown` — cooperative shutdown flag + signal handler
//! - `supervisor` — worker process spawning and PID-file bookkeeping

pub mod runner;
pub mod shutdown;
pub mod supervisor;

pub use runner::{Worker, WorkerConfig, execute_command};
pub use shutdown::{Shutdown, install_signal_handler};
pub use supervisor::{PID_FILE, StopResult, start_workers, stop_workers};
