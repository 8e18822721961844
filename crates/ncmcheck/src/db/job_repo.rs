//! Job repository: the durable backing store of the job queue.
//!
//! One row per batch. `heartbeat_at` is stored as epoch milliseconds so
//! lease expiry is a plain integer comparison.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, Database, DatabaseError};
use crate::state::BatchState;

/// Queue state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Claimed,
    Done,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Claimed => "claimed",
            JobState::Done => "done",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "claimed" => Some(JobState::Claimed),
            "done" => Some(JobState::Done),
            _ => None,
        }
    }
}

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub batch_id: String,
    pub state: JobState,
    pub claim_token: Option<String>,
    pub claimed_by: Option<String>,
    pub attempts: u32,
    pub enqueued_at: String,
    pub heartbeat_at: Option<i64>,
    pub acked_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let raw_state: String = row.get("state")?;
        let state = JobState::parse(&raw_state).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown job state '{}'", raw_state).into(),
            )
        })?;
        Ok(Self {
            batch_id: row.get("batch_id")?,
            state,
            claim_token: row.get("claim_token")?,
            claimed_by: row.get("claimed_by")?,
            attempts: row.get("attempts")?,
            enqueued_at: row.get("enqueued_at")?,
            heartbeat_at: row.get("heartbeat_at")?,
            acked_at: row.get("acked_at")?,
        })
    }
}

/// Result of trying to insert a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    BatchMissing,
    BatchNotPending(BatchState),
    AlreadyEnqueued,
}

/// Inserts a `queued` job for a PENDING batch that has no job yet.
pub fn insert_queued(db: &Database, batch_id: &str) -> Result<EnqueueOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let state: Option<BatchState> = tx
            .query_row(
                "SELECT state FROM batches WHERE id = ?1",
                params![batch_id],
                |r| r.get(0),
            )
            .optional()?;
        match state {
            None => return Ok(EnqueueOutcome::BatchMissing),
            Some(BatchState::Pending) => {}
            Some(other) => return Ok(EnqueueOutcome::BatchNotPending(other)),
        }

        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM jobs WHERE batch_id = ?1)",
            params![batch_id],
            |r| r.get(0),
        )?;
        if exists {
            return Ok(EnqueueOutcome::AlreadyEnqueued);
        }

        tx.execute(
            "INSERT INTO jobs (batch_id, state, enqueued_at) VALUES (?1, ?2, ?3)",
            params![
                batch_id,
                JobState::Queued.as_str(),
                format_timestamp(Utc::now())
            ],
        )?;
        tx.commit()?;
        Ok(EnqueueOutcome::Enqueued)
    })
}

/// Claims the oldest queued job for `worker` under a fresh `claim_token`.
pub fn claim_next(
    db: &Database,
    worker: &str,
    claim_token: &str,
    now_ms: i64,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| loop {
        let candidate: Option<String> = conn
            .query_row(
                "SELECT batch_id FROM jobs WHERE state = 'queued'
                 ORDER BY enqueued_at, batch_id LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        let Some(batch_id) = candidate else {
            return Ok(None);
        };

        // Another process may claim the same row between SELECT and UPDATE;
        // the state guard makes only one of them win.
        let changed = conn.execute(
            "UPDATE jobs SET state = 'claimed', claim_token = ?2, claimed_by = ?3,
             heartbeat_at = ?4, attempts = attempts + 1
             WHERE batch_id = ?1 AND state = 'queued'",
            params![batch_id, claim_token, worker, now_ms],
        )?;
        if changed == 1 {
            let row = conn.query_row(
                "SELECT * FROM jobs WHERE batch_id = ?1",
                params![batch_id],
                JobRow::from_row,
            )?;
            return Ok(Some(row));
        }
    })
}

/// Extends a claim. Returns false if the claim is no longer held.
pub fn renew(
    db: &Database,
    batch_id: &str,
    claim_token: &str,
    now_ms: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET heartbeat_at = ?3
             WHERE batch_id = ?1 AND claim_token = ?2 AND state = 'claimed'",
            params![batch_id, claim_token, now_ms],
        )?;
        Ok(changed == 1)
    })
}

/// Marks a claimed job done. Returns false if the claim is no longer held.
pub fn ack(db: &Database, batch_id: &str, claim_token: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'done', acked_at = ?3
             WHERE batch_id = ?1 AND claim_token = ?2 AND state = 'claimed'",
            params![batch_id, claim_token, format_timestamp(Utc::now())],
        )?;
        Ok(changed == 1)
    })
}

/// Releases claims whose heartbeat is at or before `cutoff_ms`.
///
/// Jobs whose batch already reached a terminal state are closed instead of
/// requeued. Returns the requeued batch ids.
pub fn release_stale(db: &Database, cutoff_ms: i64) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let stale: Vec<(String, BatchState)> = {
            let mut stmt = tx.prepare(
                "SELECT j.batch_id, b.state FROM jobs j JOIN batches b ON b.id = j.batch_id
                 WHERE j.state = 'claimed' AND j.heartbeat_at <= ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff_ms], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut requeued = Vec::new();
        for (batch_id, batch_state) in stale {
            if batch_state.is_terminal() {
                tx.execute(
                    "UPDATE jobs SET state = 'done', acked_at = ?2 WHERE batch_id = ?1",
                    params![batch_id, format_timestamp(Utc::now())],
                )?;
                continue;
            }
            tx.execute(
                "UPDATE jobs SET state = 'queued', claim_token = NULL, claimed_by = NULL
                 WHERE batch_id = ?1 AND state = 'claimed'",
                params![batch_id],
            )?;
            requeued.push(batch_id);
        }
        tx.commit()?;
        Ok(requeued)
    })
}

/// Enqueues PENDING batches created at or before `cutoff` that have no job row.
///
/// Covers a submission that persisted its batch but failed to enqueue it.
pub fn enqueue_orphans(db: &Database, cutoff: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let orphans: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT b.id FROM batches b LEFT JOIN jobs j ON j.batch_id = b.id
                 WHERE j.batch_id IS NULL AND b.state = 'PENDING' AND b.created_at <= ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let enqueued_at = format_timestamp(Utc::now());
        for batch_id in &orphans {
            tx.execute(
                "INSERT INTO jobs (batch_id, state, enqueued_at) VALUES (?1, 'queued', ?2)",
                params![batch_id, enqueued_at],
            )?;
        }
        tx.commit()?;
        Ok(orphans)
    })
}

/// Finds the job row of a batch.
pub fn find(db: &Database, batch_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE batch_id = ?1",
                params![batch_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
