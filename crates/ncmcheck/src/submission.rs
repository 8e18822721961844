//! Accepting a new batch.

use log::info;
use serde::Deserialize;

use crate::db::batch_repo::{self, BatchRow};
use crate::db::record_repo::RecordRow;
use crate::db::Database;
use crate::error::SubmitError;
use crate::worker::JobQueue;

/// One row of an uploaded file. Both fields are stored exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRecord {
    pub description: String,
    pub code: String,
}

impl NewRecord {
    pub fn new(description: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            code: code.into(),
        }
    }
}

/// Persists a batch with all of its records, then enqueues it.
///
/// Rows are checked before anything is written. An empty list creates a
/// batch that is already CONCLUDED and is never enqueued. If the enqueue
/// fails after the batch was stored, the error is returned and
/// [`JobQueue::recover`] will enqueue the batch later.
pub fn submit_batch(
    db: &Database,
    queue: &JobQueue,
    filename: &str,
    records: Vec<NewRecord>,
) -> Result<BatchRow, SubmitError> {
    for (index, record) in records.iter().enumerate() {
        if record.description.trim().is_empty() {
            return Err(SubmitError::InvalidRecord {
                index,
                reason: "description is empty".to_string(),
            });
        }
        if record.code.trim().is_empty() {
            return Err(SubmitError::InvalidRecord {
                index,
                reason: "code is empty".to_string(),
            });
        }
    }

    let batch = BatchRow::new(filename, records.len() as u64);
    let rows: Vec<RecordRow> = records
        .iter()
        .enumerate()
        .map(|(position, r)| RecordRow::new(&batch.id, position as u64, &r.description, &r.code))
        .collect();

    batch_repo::insert_with_records(db, &batch, &rows)?;
    info!(
        "Accepted batch {} ({}) with {} records",
        batch.id,
        batch.filename,
        rows.len()
    );

    if !rows.is_empty() {
        queue.enqueue(&batch.id)?;
    }

    Ok(batch)
}
