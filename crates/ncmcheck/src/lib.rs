pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod state;
pub mod status;
pub mod submission;
pub mod worker;

pub use classifier::{Classifier, SubprocessClassifier, Verdict};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, NcmcheckError, QueueError, Result, SubmitError};
pub use pipeline::{BatchRunner, RecordValidator, RunError, RunOutcome};
pub use state::{BatchState, RecordState};
pub use status::{list_batches, list_records, status, BatchStatus, RecordFilter};
pub use submission::{submit_batch, NewRecord};
pub use worker::{JobQueue, PoolSettings, Shutdown, WorkerPool};
