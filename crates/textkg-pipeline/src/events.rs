//! Run lifecycle events, broadcast to any number of observers.

use tokio::sync::broadcast;

use textkg_types::StageName;

/// Events emitted while a run progresses. Observers subscribe through
/// [`EventEmitter::subscribe`]; a lagging observer loses old events rather
/// than slowing the run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted {
        run_id: uuid::Uuid,
    },
    RunCompleted {
        run_id: uuid::Uuid,
        success: bool,
    },
    RunFailed {
        run_id: uuid::Uuid,
        reason: String,
    },
    StageStarted {
        run_id: uuid::Uuid,
        stage: StageName,
    },
    StageCompleted {
        run_id: uuid::Uuid,
        stage: StageName,
        duration_ms: u64,
    },
    StageFailed {
        run_id: uuid::Uuid,
        stage: StageName,
        message: String,
    },
    StageRetrying {
        run_id: uuid::Uuid,
        stage: StageName,
        retry_count: u32,
    },
}

#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
