//! Test harness for isolated end-to-end runs.
//!
//! Every harness owns a temporary directory holding its own SQLite file, so
//! tests can open a second handle to simulate another process.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use ncmcheck::classifier::Classifier;
use ncmcheck::db::record_repo::{self, RecordRow};
use ncmcheck::state::BatchState;
use ncmcheck::{
    submit_batch, BatchRunner, BatchStatus, Database, JobQueue, NewRecord, RecordValidator,
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub queue: JobQueue,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("ncmcheck.db");
        let db = Database::open(&db_path).expect("Failed to open test database");
        let queue = JobQueue::new(db.clone(), POLL_INTERVAL);

        Self {
            temp_dir,
            db_path,
            db,
            queue,
        }
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Opens an independent handle on the same database file.
    pub fn reopen(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to reopen test database")
    }

    pub fn runner(&self, classifier: Arc<dyn Classifier>) -> BatchRunner {
        self.runner_with(classifier, DEFAULT_TIMEOUT, 4)
    }

    pub fn runner_with(
        &self,
        classifier: Arc<dyn Classifier>,
        timeout: Duration,
        record_concurrency: usize,
    ) -> BatchRunner {
        let validator = RecordValidator::new(classifier, timeout);
        BatchRunner::new(self.db.clone(), validator, record_concurrency)
    }

    /// Submits and returns the new batch id.
    pub fn submit(&self, records: Vec<NewRecord>) -> String {
        submit_batch(&self.db, &self.queue, "itens.csv", records)
            .expect("Failed to submit batch")
            .id
    }

    pub fn status(&self, batch_id: &str) -> BatchStatus {
        ncmcheck::status(&self.db, batch_id)
            .expect("Failed to read status")
            .expect("Batch should exist")
    }

    pub fn records(&self, batch_id: &str) -> Vec<RecordRow> {
        record_repo::list_by_batch(&self.db, batch_id).expect("Failed to list records")
    }

    /// Polls until the batch is terminal or `timeout` elapses.
    pub async fn wait_terminal(&self, batch_id: &str, timeout: Duration) -> BatchState {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status(batch_id);
            if status.is_terminal {
                return status.state;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "batch {} still {} after {:?}",
                batch_id,
                status.state,
                timeout
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Polls until at least `n` records of the batch are processed.
    pub async fn wait_processed(&self, batch_id: &str, n: u64, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.status(batch_id).processed < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "batch {} did not reach {} processed records",
                batch_id,
                n
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
