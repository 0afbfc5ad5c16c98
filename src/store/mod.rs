//! Persistence layer — the shared job table and its atomic claim primitives.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{JobStore, JobUpdate};
