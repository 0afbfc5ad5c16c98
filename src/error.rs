//! Error types for jobq.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Job with id '{id}' already exists")]
    DuplicateId { id: String },

    #[error("Job '{id}' not found")]
    NotFound { id: String },
}

/// Job validation errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job id must be non-empty")]
    EmptyId,

    #[error("Job command must be non-empty")]
    EmptyCommand,

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown job state: {0}")]
    UnknownState(String),
}

/// Result type alias for jobq.
pub type Result<T> = std::result::Result<T, Error>;
