//! Batch processing pipeline: per-record validation and the batch runner.

pub mod error;
pub mod progress;
pub mod runner;
pub mod validator;

pub use error::{BatchLoadError, ClassificationError, ClassificationErrorKind, RunError};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{BatchRunner, Heartbeat, NoHeartbeat, RunOutcome};
pub use validator::{RecordOutcome, RecordValidator, CONFIRMED_NOTE};
