use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::{BatchState, RecordState};

/// Events emitted by the runner while it works through a batch.
///
/// Informational only; status queries read the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchStarted {
        batch_id: String,
        pending: u64,
    },
    RecordCompleted {
        batch_id: String,
        record_id: String,
        state: RecordState,
    },
    BatchFinished {
        batch_id: String,
        state: BatchState,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for tests and one-shot commands.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Fans events out to any number of subscribers.
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
