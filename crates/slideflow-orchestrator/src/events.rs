//! Observer notifications.
//!
//! The orchestrator broadcasts lifecycle notifications to any number of
//! subscribers (a progress dialog, a CLI progress bar, tests).

use crate::lifecycle::RunId;
use crate::pipeline::ImageId;
use tokio::sync::broadcast;
use tracing::debug;

/// Notifications emitted on the interactive thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// A run was created and its worker started.
    RunStarted {
        /// Run ID.
        run_id: RunId,
        /// Target image.
        image: ImageId,
        /// Position in the batch, `None` for single runs.
        batch_index: Option<usize>,
        /// Upper bound of `ProgressChanged` for this run or batch.
        maximum: u32,
    },
    /// Aggregate progress changed.
    ProgressChanged {
        /// Percentage, in `0..=maximum`.
        percent: u32,
    },
    /// User-facing, non-fatal message.
    Message {
        /// Message text.
        text: String,
    },
    /// A single run or a whole batch completed successfully.
    Finished {
        /// Last processed image, for the caller to refresh its view.
        image: ImageId,
    },
}

/// Broadcast hub for [`OrchestratorEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    broadcast_tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self { broadcast_tx }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Emits an event. Having no subscribers is not an error.
    pub fn emit(&self, event: OrchestratorEvent) {
        debug!("Orchestrator event: {:?}", event);
        let _ = self.broadcast_tx.send(event);
    }

    pub fn progress(&self, percent: u32) {
        self.emit(OrchestratorEvent::ProgressChanged { percent });
    }

    pub fn message(&self, text: impl Into<String>) {
        self.emit(OrchestratorEvent::Message { text: text.into() });
    }

    pub fn finished(&self, image: ImageId) {
        self.emit(OrchestratorEvent::Finished { image });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
