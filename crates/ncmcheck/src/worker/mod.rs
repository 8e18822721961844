//! Background workers: the durable job queue, the pool that drains it and
//! the shutdown flag they share.

pub mod pool;
pub mod queue;
pub mod shutdown;

pub use pool::{PoolSettings, WorkerPool};
pub use queue::{ClaimedJob, JobQueue, LeaseHeartbeat};
pub use shutdown::{Shutdown, ShutdownSignal};
