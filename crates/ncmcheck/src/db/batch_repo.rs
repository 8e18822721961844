//! Batch repository: operations on the `batches` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;

use super::{format_timestamp, get_timestamp, record_repo, Database, DatabaseError};
use crate::db::record_repo::RecordRow;
use crate::state::BatchState;

/// A batch row from the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow {
    pub id: String,
    pub filename: String,
    pub total_records: u64,
    pub state: BatchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRow {
    /// Creates a new batch row with a fresh identifier.
    ///
    /// An empty batch has nothing to process and starts out CONCLUDED.
    pub fn new(filename: &str, total_records: u64) -> Self {
        let now = Utc::now();
        let state = if total_records == 0 {
            BatchState::Concluded
        } else {
            BatchState::Pending
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            total_records,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            total_records: row.get("total_records")?,
            state: row.get("state")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }
}

/// Inserts a batch together with all of its records in one transaction.
///
/// Either the batch and every record become visible, or nothing does.
pub fn insert_with_records(
    db: &Database,
    batch: &BatchRow,
    records: &[RecordRow],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO batches (id, filename, total_records, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                batch.id,
                batch.filename,
                batch.total_records as i64,
                batch.state,
                format_timestamp(batch.created_at),
                format_timestamp(batch.updated_at),
            ],
        )?;
        for record in records {
            record_repo::insert_in(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    })
}

/// Finds a batch by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM batches WHERE id = ?1",
                params![id],
                BatchRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Moves a batch to `to` if its current state is one of `from`.
///
/// Returns false when the batch is missing or in a state not listed in
/// `from`; the row is left untouched in that case.
pub fn transition(
    db: &Database,
    id: &str,
    from: &[BatchState],
    to: BatchState,
) -> Result<bool, DatabaseError> {
    debug_assert!(from.iter().all(|s| s.can_transition_to(to)));
    if from.is_empty() {
        return Ok(false);
    }

    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 4)).collect();
        let sql = format!(
            "UPDATE batches SET state = ?2, updated_at = ?3 WHERE id = ?1 AND state IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(id.to_string()),
            Box::new(to),
            Box::new(format_timestamp(Utc::now())),
        ];
        for state in from {
            values.push(Box::new(*state));
        }

        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed == 1)
    })
}

/// Lists batches, most recent first.
pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM batches ORDER BY created_at DESC, id LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], BatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
