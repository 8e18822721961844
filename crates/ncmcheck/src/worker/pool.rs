use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::pipeline::{BatchRunner, RunError, RunOutcome};

use super::queue::{ClaimedJob, JobQueue, LeaseHeartbeat};
use super::shutdown::{Shutdown, ShutdownSignal};

/// Timing knobs of the pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    /// Claims idle this long are handed to another worker.
    pub lease: Duration,
    pub recover_interval: Duration,
    /// First retry delay after a queue error.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Claims after which a batch is abandoned instead of run again.
    pub max_attempts: u32,
}

impl PoolSettings {
    pub fn from_config(worker_count: usize, queue: &QueueConfig) -> Self {
        Self {
            worker_count,
            lease: queue.lease(),
            recover_interval: queue.recover_interval(),
            initial_backoff: queue.poll_interval(),
            max_backoff: queue.max_backoff(),
            max_attempts: queue.max_attempts,
        }
    }
}

/// Exponential retry delay, doubling up to a ceiling.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// A fixed set of tokio tasks pulling batches off the queue, plus one task
/// that periodically recovers expired claims.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    recovery: JoinHandle<()>,
    shutdown: Shutdown,
}

impl WorkerPool {
    /// Spawns the workers on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if `settings.worker_count` is 0.
    pub fn start(
        queue: JobQueue,
        runner: Arc<BatchRunner>,
        settings: PoolSettings,
        shutdown: Shutdown,
    ) -> Self {
        assert!(settings.worker_count > 0, "worker_count must be > 0");

        let mut workers = Vec::with_capacity(settings.worker_count);
        for worker_id in 0..settings.worker_count {
            let queue = queue.clone();
            let runner = Arc::clone(&runner);
            let signal = shutdown.signal();
            let backoff = Backoff::new(settings.initial_backoff, settings.max_backoff);
            workers.push(tokio::spawn(run_worker(
                worker_id,
                queue,
                runner,
                signal,
                backoff,
                settings.max_attempts,
            )));
        }

        let recovery = tokio::spawn(run_recovery(
            queue,
            settings.lease,
            settings.recover_interval,
            shutdown.signal(),
        ));

        info!("Started {} workers", settings.worker_count);

        Self {
            workers,
            recovery,
            shutdown,
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.trigger();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Waits for every task to stop. Call after [`shutdown`](Self::shutdown).
    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        if let Err(e) = self.recovery.await {
            error!("Recovery task panicked: {:?}", e);
        }

        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    queue: JobQueue,
    runner: Arc<BatchRunner>,
    mut signal: ShutdownSignal,
    mut backoff: Backoff,
    max_attempts: u32,
) {
    let name = format!("worker-{}", worker_id);
    debug!("{} started", name);

    loop {
        match queue.dequeue(&name, &mut signal).await {
            Ok(Some(job)) => {
                backoff.reset();
                handle_job(&name, &queue, &runner, &signal, job, max_attempts).await;
            }
            Ok(None) => break,
            Err(e) => {
                let delay = backoff.next_delay();
                error!("{}: queue error, retrying in {:?}: {}", name, delay, e);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.recv() => break,
                }
            }
        }
    }

    debug!("{} stopped", name);
}

async fn handle_job(
    name: &str,
    queue: &JobQueue,
    runner: &BatchRunner,
    signal: &ShutdownSignal,
    job: ClaimedJob,
    max_attempts: u32,
) {
    info!(
        "{} claimed batch {} (attempt {})",
        name, job.batch_id, job.attempts
    );

    let result = if job.attempts > max_attempts {
        warn!(
            "{}: batch {} exceeded {} attempts, failing its remaining records",
            name, job.batch_id, max_attempts
        );
        let cause = format!("batch claimed {} times without finishing", job.attempts);
        runner.abandon(&job.batch_id, &cause).await
    } else {
        let heartbeat = LeaseHeartbeat::new(queue, &job);
        runner
            .run_with_heartbeat(&job.batch_id, signal, &heartbeat)
            .await
    };

    let ack = match result {
        Ok(RunOutcome::Finished { .. }) | Ok(RunOutcome::Skipped { .. }) => true,
        Ok(RunOutcome::Interrupted { pending }) => {
            info!(
                "{} left batch {} with {} pending records for recovery",
                name, job.batch_id, pending
            );
            false
        }
        // Nothing left to do for a batch that is gone or marked FAILED.
        Err(RunError::Load(e)) => {
            error!("{}: {}", name, e);
            true
        }
        Err(e) => {
            warn!(
                "{}: batch {} will be retried after its lease expires: {}",
                name, job.batch_id, e
            );
            false
        }
    };

    if ack {
        let batch_id = job.batch_id.clone();
        if let Err(e) = queue.offload(move |q| q.ack(&job)).await {
            warn!("{}: failed to ack batch {}: {}", name, batch_id, e);
        }
    }
}

async fn run_recovery(
    queue: JobQueue,
    lease: Duration,
    interval: Duration,
    mut signal: ShutdownSignal,
) {
    loop {
        match queue.offload(move |q| q.recover(lease)).await {
            Ok(ids) if !ids.is_empty() => debug!("Recovery re-queued {:?}", ids),
            Ok(_) => {}
            Err(e) => error!("Recovery pass failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = signal.recv() => break,
        }
    }
}
