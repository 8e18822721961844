//! Read-only progress views computed from persisted rows.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::batch_repo::{self, BatchRow};
use crate::db::record_repo::{self, RecordRow};
use crate::db::{Database, DatabaseError};
use crate::state::{BatchState, RecordState};

/// Progress of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub filename: String,
    pub state: BatchState,
    pub total: u64,
    pub processed: u64,
    pub valid: u64,
    pub divergent: u64,
    pub failed: u64,
    pub pending: u64,
    /// `round(processed / total * 100)`, 0 for an empty batch.
    pub percent: u8,
    pub is_terminal: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which records of a batch to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFilter {
    #[default]
    All,
    Divergent,
    Failed,
}

impl FromStr for RecordFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(RecordFilter::All),
            "divergent" => Ok(RecordFilter::Divergent),
            "failed" => Ok(RecordFilter::Failed),
            other => Err(format!(
                "unknown filter '{}' (expected all, divergent or failed)",
                other
            )),
        }
    }
}

fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (processed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

fn summarize(db: &Database, batch: BatchRow) -> Result<BatchStatus, DatabaseError> {
    let counts = record_repo::count_by_state(db, &batch.id)?;
    let processed = counts.processed();
    Ok(BatchStatus {
        percent: percent(processed, batch.total_records),
        is_terminal: batch.state.is_terminal(),
        batch_id: batch.id,
        filename: batch.filename,
        state: batch.state,
        total: batch.total_records,
        processed,
        valid: counts.valid,
        divergent: counts.divergent,
        failed: counts.failed,
        pending: counts.pending,
        created_at: batch.created_at,
        updated_at: batch.updated_at,
    })
}

/// Current progress of a batch, or `None` if it does not exist.
pub fn status(db: &Database, batch_id: &str) -> Result<Option<BatchStatus>, DatabaseError> {
    batch_repo::find_by_id(db, batch_id)?
        .map(|batch| summarize(db, batch))
        .transpose()
}

/// Records of a batch in file order, optionally narrowed to one outcome.
pub fn list_records(
    db: &Database,
    batch_id: &str,
    filter: RecordFilter,
) -> Result<Vec<RecordRow>, DatabaseError> {
    match filter {
        RecordFilter::All => record_repo::list_by_batch(db, batch_id),
        RecordFilter::Divergent => record_repo::list_by_state(db, batch_id, RecordState::Divergent),
        RecordFilter::Failed => record_repo::list_by_state(db, batch_id, RecordState::Failed),
    }
}

/// Most recent batches first, each with its progress.
pub fn list_batches(db: &Database, limit: u64) -> Result<Vec<BatchStatus>, DatabaseError> {
    batch_repo::list_recent(db, limit)?
        .into_iter()
        .map(|batch| summarize(db, batch))
        .collect()
}
