//! Record repository: operations on the `records` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{format_timestamp, get_optional_timestamp, Database, DatabaseError};
use crate::state::RecordState;

/// A record row from the database.
///
/// `original_code` is stored as TEXT and never converted, so codes such as
/// `0102.31.00` keep their leading zeros and punctuation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRow {
    pub id: String,
    pub batch_id: String,
    pub position: u64,
    pub description: String,
    pub original_code: String,
    pub suggested_code: Option<String>,
    pub state: RecordState,
    pub divergence_reason: Option<String>,
    pub confidence: Option<f64>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl RecordRow {
    /// Creates a new PENDING record.
    pub fn new(batch_id: &str, position: u64, description: &str, original_code: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            position,
            description: description.to_string(),
            original_code: original_code.to_string(),
            suggested_code: None,
            state: RecordState::Pending,
            divergence_reason: None,
            confidence: None,
            processed_at: None,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            position: row.get("position")?,
            description: row.get("description")?,
            original_code: row.get("original_code")?,
            suggested_code: row.get("suggested_code")?,
            state: row.get("state")?,
            divergence_reason: row.get("divergence_reason")?,
            confidence: row.get("confidence")?,
            processed_at: get_optional_timestamp(row, "processed_at")?,
        })
    }
}

/// The single write a record receives when it leaves PENDING.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordCompletion {
    pub state: RecordState,
    pub suggested_code: String,
    pub divergence_reason: String,
    pub confidence: f64,
    pub processed_at: DateTime<Utc>,
}

/// Per-state record counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: u64,
    pub valid: u64,
    pub divergent: u64,
    pub failed: u64,
}

impl StateCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.valid + self.divergent + self.failed
    }

    /// Records that reached any terminal state.
    pub fn processed(&self) -> u64 {
        self.valid + self.divergent + self.failed
    }
}

/// Inserts a record using an already-open connection or transaction.
pub(crate) fn insert_in(conn: &Connection, record: &RecordRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO records (id, batch_id, position, description, original_code,
         suggested_code, state, divergence_reason, confidence, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.batch_id,
            record.position as i64,
            record.description,
            record.original_code,
            record.suggested_code,
            record.state,
            record.divergence_reason,
            record.confidence,
            record.processed_at.map(format_timestamp),
        ],
    )?;
    Ok(())
}

/// Finds a record by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM records WHERE id = ?1",
                params![id],
                RecordRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists every record of a batch in file order.
pub fn list_by_batch(db: &Database, batch_id: &str) -> Result<Vec<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM records WHERE batch_id = ?1 ORDER BY position")?;
        let rows = stmt
            .query_map(params![batch_id], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists the records of a batch in one state, in file order.
pub fn list_by_state(
    db: &Database,
    batch_id: &str,
    state: RecordState,
) -> Result<Vec<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM records WHERE batch_id = ?1 AND state = ?2 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![batch_id, state], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Writes the outcome of a record, but only while it is still PENDING.
///
/// Returns false if another run already moved the record out of PENDING,
/// in which case nothing is written.
pub fn complete(
    db: &Database,
    id: &str,
    completion: &RecordCompletion,
) -> Result<bool, DatabaseError> {
    debug_assert!(completion.state.is_terminal());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE records SET state = ?2, suggested_code = ?3, divergence_reason = ?4,
             confidence = ?5, processed_at = ?6
             WHERE id = ?1 AND state = 'PENDING'",
            params![
                id,
                completion.state,
                completion.suggested_code,
                completion.divergence_reason,
                completion.confidence,
                format_timestamp(completion.processed_at),
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Marks every PENDING record of a batch FAILED with `reason`, keeping the
/// original code as the suggestion. Returns how many records changed.
pub fn fail_pending(
    db: &Database,
    batch_id: &str,
    reason: &str,
    processed_at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE records SET state = 'FAILED', suggested_code = original_code,
             divergence_reason = ?2, confidence = 0, processed_at = ?3
             WHERE batch_id = ?1 AND state = 'PENDING'",
            params![batch_id, reason, format_timestamp(processed_at)],
        )?;
        Ok(changed as u64)
    })
}

/// Counts the records of a batch per state, using the `(batch_id, state)` index.
pub fn count_by_state(db: &Database, batch_id: &str) -> Result<StateCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM records WHERE batch_id = ?1 GROUP BY state",
        )?;
        let mut counts = StateCounts::default();
        let rows = stmt.query_map(params![batch_id], |r| {
            Ok((r.get::<_, RecordState>(0)?, r.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            match state {
                RecordState::Pending => counts.pending = count,
                RecordState::Valid => counts.valid = count,
                RecordState::Divergent => counts.divergent = count,
                RecordState::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    })
}
