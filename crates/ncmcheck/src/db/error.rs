use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// A stored value could not be read back as its Rust type, e.g. a
    /// malformed timestamp or an unknown state string.
    #[error("Corrupt value in column {column}: {reason}")]
    Decode { column: usize, reason: String },

    #[error("Cannot create database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    /// The blocking task running a query panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(column, _, source) => {
                DatabaseError::Decode {
                    column,
                    reason: source.to_string(),
                }
            }
            other => DatabaseError::Sqlite(other),
        }
    }
}
