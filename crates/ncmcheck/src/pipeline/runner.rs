use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use tracing::{info_span, Instrument};

use crate::db::batch_repo::{self, BatchRow};
use crate::db::record_repo::{self, RecordRow, StateCounts};
use crate::db::{Database, DatabaseError};
use crate::error::QueueError;
use crate::state::{BatchState, RecordState};
use crate::worker::ShutdownSignal;

use super::error::{BatchLoadError, ClassificationErrorKind, RunError};
use super::progress::{NoopProgress, ProgressEvent, ProgressReporter};
use super::validator::{RecordOutcome, RecordValidator};

/// Keeps the claim on a batch alive while it is being processed.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    async fn beat(&self) -> Result<(), QueueError>;
}

/// For runs that hold no queue claim.
pub struct NoHeartbeat;

#[async_trait]
impl Heartbeat for NoHeartbeat {
    async fn beat(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// How a run ended when no error occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every record is terminal and the batch reached `state`.
    Finished { state: BatchState, counts: StateCounts },
    /// The batch was already terminal; nothing was touched.
    Skipped { state: BatchState },
    /// Shutdown stopped the run with `pending` records left for a later run.
    Interrupted { pending: u64 },
}

enum RecordResult {
    Completed { record_id: String, state: RecordState },
    AlreadyDone,
    Aborted,
    PersistFailed { record_id: String, error: DatabaseError },
}

/// Drives one batch from PENDING (or a half-done PROCESSING) to a terminal state.
///
/// Runs are idempotent: only PENDING records are sent to the classifier and
/// each record write is guarded, so replaying a batch after a crash finishes
/// the remaining records without touching completed ones. Database calls run
/// on the blocking pool.
pub struct BatchRunner {
    db: Database,
    validator: RecordValidator,
    record_concurrency: usize,
    progress: Arc<dyn ProgressReporter>,
}

impl BatchRunner {
    pub fn new(db: Database, validator: RecordValidator, record_concurrency: usize) -> Self {
        Self {
            db,
            validator,
            record_concurrency: record_concurrency.max(1),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(
        &self,
        batch_id: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<RunOutcome, RunError> {
        self.run_with_heartbeat(batch_id, shutdown, &NoHeartbeat)
            .await
    }

    /// Like [`run`](Self::run), calling `heartbeat` after every completed record.
    ///
    /// A lost lease stops scheduling further records and is returned as
    /// [`RunError::Queue`].
    pub async fn run_with_heartbeat(
        &self,
        batch_id: &str,
        shutdown: &ShutdownSignal,
        heartbeat: &dyn Heartbeat,
    ) -> Result<RunOutcome, RunError> {
        let span = info_span!("batch_run", batch_id = %batch_id);
        self.execute(batch_id, shutdown, heartbeat)
            .instrument(span)
            .await
    }

    /// Gives up on a batch that kept failing: every record still PENDING is
    /// marked FAILED with `cause`, then the batch is finalized.
    ///
    /// No classifier call is made. A terminal batch is left as it is.
    pub async fn abandon(&self, batch_id: &str, cause: &str) -> Result<RunOutcome, RunError> {
        let span = info_span!("batch_abandon", batch_id = %batch_id);
        async {
            let batch = match self.load_batch(batch_id).await? {
                Some(batch) => batch,
                None => return Err(BatchLoadError::NotFound(batch_id.to_string()).into()),
            };
            if batch.state.is_terminal() {
                return Ok(RunOutcome::Skipped { state: batch.state });
            }
            self.set_state(batch_id, &[BatchState::Pending], BatchState::Processing)
                .await?;

            let reason = format!(
                "Classification failed ({}): {}",
                ClassificationErrorKind::RetryLimitExceeded,
                cause
            );
            let id = batch_id.to_string();
            let failed = self
                .db
                .blocking(move |db| record_repo::fail_pending(db, &id, &reason, Utc::now()))
                .await?;
            warn!(
                "Abandoned batch {}: {} pending records marked FAILED ({})",
                batch_id, failed, cause
            );

            let counts = self.counts(batch_id).await?;
            self.finalize(batch_id, counts).await
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        batch_id: &str,
        shutdown: &ShutdownSignal,
        heartbeat: &dyn Heartbeat,
    ) -> Result<RunOutcome, RunError> {
        let batch = match self.load_batch(batch_id).await {
            Ok(Some(batch)) => batch,
            Ok(None) => return Err(BatchLoadError::NotFound(batch_id.to_string()).into()),
            Err(e) => return Err(self.fail_batch(batch_id, e).await.into()),
        };

        if batch.state.is_terminal() {
            info!("Batch {} is already {}, skipping", batch_id, batch.state);
            return Ok(RunOutcome::Skipped { state: batch.state });
        }

        let moved = match self
            .set_state(
                batch_id,
                &[BatchState::Pending, BatchState::Processing],
                BatchState::Processing,
            )
            .await
        {
            Ok(moved) => moved,
            Err(e) => return Err(self.fail_batch(batch_id, e).await.into()),
        };
        if !moved {
            // Finished or removed between the read and the transition.
            return match self.load_batch(batch_id).await {
                Ok(Some(current)) => Ok(RunOutcome::Skipped {
                    state: current.state,
                }),
                Ok(None) => Err(BatchLoadError::NotFound(batch_id.to_string()).into()),
                Err(e) => Err(self.fail_batch(batch_id, e).await.into()),
            };
        }

        let id = batch_id.to_string();
        let pending = match self
            .db
            .blocking(move |db| record_repo::list_by_state(db, &id, RecordState::Pending))
            .await
        {
            Ok(pending) => pending,
            Err(e) => return Err(self.fail_batch(batch_id, e).await.into()),
        };

        info!(
            "Processing batch {} ({}): {} of {} records pending",
            batch_id,
            batch.filename,
            pending.len(),
            batch.total_records
        );
        self.progress.report(ProgressEvent::BatchStarted {
            batch_id: batch_id.to_string(),
            pending: pending.len() as u64,
        });

        let halt = AtomicBool::new(false);
        let mut results = stream::iter(pending)
            .map(|record| self.process_record(record, shutdown.clone(), &halt))
            .buffer_unordered(self.record_concurrency);

        let mut interrupted = false;
        let mut lease_error: Option<QueueError> = None;
        let mut persist_error: Option<DatabaseError> = None;

        while let Some(result) = results.next().await {
            match result {
                RecordResult::Completed { record_id, state } => {
                    self.progress.report(ProgressEvent::RecordCompleted {
                        batch_id: batch_id.to_string(),
                        record_id,
                        state,
                    });
                    if lease_error.is_none() {
                        match heartbeat.beat().await {
                            Ok(()) => {}
                            Err(e @ QueueError::LeaseLost(_)) => {
                                warn!("Lease on batch {} lost, stopping run: {}", batch_id, e);
                                halt.store(true, Ordering::Relaxed);
                                lease_error = Some(e);
                            }
                            Err(e) => warn!("Failed to renew lease on batch {}: {}", batch_id, e),
                        }
                    }
                }
                RecordResult::AlreadyDone => {}
                RecordResult::Aborted => interrupted = true,
                RecordResult::PersistFailed { record_id, error } => {
                    error!("Failed to persist record {}: {}", record_id, error);
                    if persist_error.is_none() {
                        persist_error = Some(error);
                    }
                }
            }
        }
        drop(results);

        if let Some(e) = lease_error {
            return Err(RunError::Queue(e));
        }
        if let Some(e) = persist_error {
            return Err(RunError::Persist(e));
        }

        let counts = self.counts(batch_id).await?;
        if interrupted || counts.pending > 0 {
            info!(
                "Run of batch {} interrupted with {} records pending",
                batch_id, counts.pending
            );
            return Ok(RunOutcome::Interrupted {
                pending: counts.pending,
            });
        }

        self.finalize(batch_id, counts).await
    }

    /// Moves a PROCESSING batch with no PENDING records to its terminal state.
    async fn finalize(&self, batch_id: &str, counts: StateCounts) -> Result<RunOutcome, RunError> {
        let target = if counts.failed > 0 {
            BatchState::FailedPartial
        } else {
            BatchState::Concluded
        };
        let state = if self
            .set_state(batch_id, &[BatchState::Processing], target)
            .await?
        {
            target
        } else {
            // Another runner finalized first; report what is stored.
            self.load_batch(batch_id)
                .await?
                .map(|b| b.state)
                .unwrap_or(target)
        };

        info!(
            "Batch {} finished as {}: {} valid, {} divergent, {} failed",
            batch_id, state, counts.valid, counts.divergent, counts.failed
        );
        self.progress.report(ProgressEvent::BatchFinished {
            batch_id: batch_id.to_string(),
            state,
        });

        Ok(RunOutcome::Finished { state, counts })
    }

    async fn process_record(
        &self,
        record: RecordRow,
        mut shutdown: ShutdownSignal,
        halt: &AtomicBool,
    ) -> RecordResult {
        if shutdown.is_triggered() || halt.load(Ordering::Relaxed) {
            return RecordResult::Aborted;
        }

        let verdict = tokio::select! {
            biased;
            _ = shutdown.recv() => return RecordResult::Aborted,
            verdict = self.validator.validate(&record.id, &record.description, &record.original_code) => verdict,
        };

        let outcome = match verdict {
            Ok(verdict) => RecordOutcome::from_verdict(&record.original_code, &verdict),
            Err(e) => {
                warn!("{}", e);
                RecordOutcome::from_error(&record.original_code, &e)
            }
        };
        let state = outcome.state;
        let completion = outcome.into_completion(Utc::now());

        let id = record.id.clone();
        match self
            .db
            .blocking(move |db| record_repo::complete(db, &id, &completion))
            .await
        {
            Ok(true) => RecordResult::Completed {
                record_id: record.id,
                state,
            },
            Ok(false) => {
                debug!("Record {} was already completed elsewhere", record.id);
                RecordResult::AlreadyDone
            }
            Err(error) => RecordResult::PersistFailed {
                record_id: record.id,
                error,
            },
        }
    }

    async fn load_batch(&self, batch_id: &str) -> Result<Option<BatchRow>, DatabaseError> {
        let id = batch_id.to_string();
        self.db
            .blocking(move |db| batch_repo::find_by_id(db, &id))
            .await
    }

    async fn set_state(
        &self,
        batch_id: &str,
        from: &[BatchState],
        to: BatchState,
    ) -> Result<bool, DatabaseError> {
        let id = batch_id.to_string();
        let from = from.to_vec();
        self.db
            .blocking(move |db| batch_repo::transition(db, &id, &from, to))
            .await
    }

    async fn counts(&self, batch_id: &str) -> Result<StateCounts, DatabaseError> {
        let id = batch_id.to_string();
        self.db
            .blocking(move |db| record_repo::count_by_state(db, &id))
            .await
    }

    /// Marks a batch that could not be loaded as FAILED, as far as possible.
    async fn fail_batch(&self, batch_id: &str, source: DatabaseError) -> BatchLoadError {
        error!("Failed to load batch {}: {}", batch_id, source);
        match self
            .set_state(
                batch_id,
                &[BatchState::Pending, BatchState::Processing],
                BatchState::Failed,
            )
            .await
        {
            Ok(true) => self.progress.report(ProgressEvent::BatchFinished {
                batch_id: batch_id.to_string(),
                state: BatchState::Failed,
            }),
            Ok(false) => {}
            Err(e) => error!("Failed to mark batch {} as FAILED: {}", batch_id, e),
        }
        BatchLoadError::Database {
            batch_id: batch_id.to_string(),
            source,
        }
    }
}
