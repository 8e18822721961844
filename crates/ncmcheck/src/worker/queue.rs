use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use tokio::sync::Notify;

use crate::db::job_repo::{self, EnqueueOutcome};
use crate::db::{format_timestamp, Database, DatabaseError};
use crate::error::QueueError;
use crate::pipeline::Heartbeat;

use super::shutdown::ShutdownSignal;

/// A job this process holds a claim on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub batch_id: String,
    pub claim_token: String,
    /// Claims taken on this job so far, this one included.
    pub attempts: u32,
}

/// Durable job queue stored in the `jobs` table.
///
/// Delivery is at-least-once: a claim that stops heartbeating is handed out
/// again by [`recover`](Self::recover). Only the current claim token can
/// renew or ack a job.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    poll_interval: Duration,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(db: Database, poll_interval: Duration) -> Self {
        Self {
            db,
            poll_interval,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn enqueue(&self, batch_id: &str) -> Result<(), QueueError> {
        match job_repo::insert_queued(&self.db, batch_id)? {
            EnqueueOutcome::Enqueued => {
                debug!("Enqueued batch {}", batch_id);
                self.notify.notify_one();
                Ok(())
            }
            EnqueueOutcome::BatchMissing => Err(QueueError::BatchNotFound(batch_id.to_string())),
            EnqueueOutcome::BatchNotPending(state) => Err(QueueError::NotEnqueueable {
                batch_id: batch_id.to_string(),
                state,
            }),
            EnqueueOutcome::AlreadyEnqueued => {
                Err(QueueError::AlreadyEnqueued(batch_id.to_string()))
            }
        }
    }

    /// Claims the oldest queued job without waiting.
    pub fn try_dequeue(&self, worker: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let token = uuid::Uuid::new_v4().to_string();
        let row = job_repo::claim_next(&self.db, worker, &token, now_ms())?;
        Ok(row.map(|row| ClaimedJob {
            batch_id: row.batch_id,
            claim_token: token,
            attempts: row.attempts,
        }))
    }

    /// Waits until a job can be claimed. Returns `None` once shutdown fires.
    pub async fn dequeue(
        &self,
        worker: &str,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        loop {
            if shutdown.is_triggered() {
                return Ok(None);
            }

            // Registered before the check so an enqueue in between is not missed.
            let notified = self.notify.notified();
            let name = worker.to_string();
            if let Some(job) = self.offload(move |q| q.try_dequeue(&name)).await? {
                return Ok(Some(job));
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.recv() => return Ok(None),
            }
        }
    }

    pub fn renew(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        if job_repo::renew(&self.db, &job.batch_id, &job.claim_token, now_ms())? {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(job.batch_id.clone()))
        }
    }

    pub fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        if job_repo::ack(&self.db, &job.batch_id, &job.claim_token)? {
            debug!("Acked batch {}", job.batch_id);
            Ok(())
        } else {
            Err(QueueError::LeaseLost(job.batch_id.clone()))
        }
    }

    /// Re-queues claims idle for longer than `older_than`, and enqueues
    /// PENDING batches at least that old that never got a job.
    ///
    /// Returns the ids of the batches made claimable again.
    pub fn recover(&self, older_than: Duration) -> Result<Vec<String>, QueueError> {
        let age = chrono::Duration::from_std(older_than)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let now = Utc::now();
        let cutoff = now.checked_sub_signed(age).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let cutoff_ms = cutoff.timestamp_millis();

        let mut recovered = job_repo::release_stale(&self.db, cutoff_ms)?;
        recovered.extend(job_repo::enqueue_orphans(&self.db, &format_timestamp(cutoff))?);

        if !recovered.is_empty() {
            info!("Recovered {} batches: {:?}", recovered.len(), recovered);
            for _ in &recovered {
                self.notify.notify_one();
            }
        }
        Ok(recovered)
    }

    /// Runs a synchronous queue call on the blocking pool.
    pub(crate) async fn offload<F, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&JobQueue) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || f(&queue))
            .await
            .map_err(|e| QueueError::Storage(DatabaseError::Task(e.to_string())))?
    }
}

/// Renews one claim from inside a batch run.
pub struct LeaseHeartbeat {
    queue: JobQueue,
    job: ClaimedJob,
}

impl LeaseHeartbeat {
    pub fn new(queue: &JobQueue, job: &ClaimedJob) -> Self {
        Self {
            queue: queue.clone(),
            job: job.clone(),
        }
    }
}

#[async_trait]
impl Heartbeat for LeaseHeartbeat {
    async fn beat(&self) -> Result<(), QueueError> {
        let job = self.job.clone();
        self.queue.offload(move |q| q.renew(&job)).await
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
