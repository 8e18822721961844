use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::RunError;
use crate::state::BatchState;

#[derive(Error, Debug)]
pub enum NcmcheckError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to read '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Batch {0} not found")]
    BatchNotFound(String),

    #[error("{0}")]
    Usage(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage failed: {0}")]
    Storage(#[from] crate::db::DatabaseError),

    #[error("Batch {0} does not exist")]
    BatchNotFound(String),

    #[error("Batch {batch_id} is {state} and cannot be enqueued")]
    NotEnqueueable { batch_id: String, state: BatchState },

    #[error("Batch {0} is already enqueued")]
    AlreadyEnqueued(String),

    #[error("Claim on batch {0} is no longer held")]
    LeaseLost(String),
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid record at row {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("Failed to persist batch: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to enqueue batch: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, NcmcheckError>;
