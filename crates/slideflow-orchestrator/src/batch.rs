//! Batch sequencing.
//!
//! A batch applies one pipeline to an ordered list of images, one run at a
//! time. The next item only starts after the previous run's completion has been
//! processed. The sequencer is a plain state machine with no threads, driven by
//! completion events from the orchestrator.

use crate::pipeline::ImageId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Batch sequencing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    /// No batch in progress.
    NotBatching,
    /// Waiting for the run of item `i` to complete.
    AwaitingItem(usize),
    /// Every item completed.
    Done,
}

/// Ordered images captured when a batch starts. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pipeline: PathBuf,
    images: Vec<ImageId>,
}

impl BatchPlan {
    /// Returns `None` for an empty image list.
    #[must_use]
    pub fn new(pipeline: impl Into<PathBuf>, images: Vec<ImageId>) -> Option<Self> {
        if images.is_empty() {
            return None;
        }
        Some(Self { pipeline: pipeline.into(), images })
    }

    #[must_use]
    pub fn pipeline(&self) -> &Path {
        &self.pipeline
    }

    #[must_use]
    pub fn images(&self) -> &[ImageId] {
        &self.images
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// What the orchestrator should do after a run completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStep {
    /// The completed run was not part of a batch.
    Single,
    /// Start item `index` with the same pipeline.
    Next {
        index: usize,
        image: ImageId,
        pipeline: PathBuf,
    },
    /// The last item completed.
    Finished { last: ImageId, len: usize },
}

/// State machine advancing a batch one completed run at a time.
#[derive(Debug, Clone)]
pub struct BatchSequencer {
    state: BatchState,
    plan: Option<BatchPlan>,
}

impl BatchSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self { state: BatchState::NotBatching, plan: None }
    }

    #[must_use]
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Whether a batch item is pending or running.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        matches!(self.state, BatchState::AwaitingItem(_))
    }

    /// Index of the item being processed.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            BatchState::AwaitingItem(index) => Some(index),
            BatchState::NotBatching | BatchState::Done => None,
        }
    }

    /// Number of items in the active batch.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        if self.is_batching() { self.plan.as_ref().map(BatchPlan::len) } else { None }
    }

    /// Starts `plan`, replacing any previous batch.
    ///
    /// # Returns
    /// The first image to process.
    pub fn begin(&mut self, plan: BatchPlan) -> ImageId {
        let first = plan.images[0].clone();
        info!(items = plan.len(), pipeline = %plan.pipeline.display(), "Batch started");
        self.plan = Some(plan);
        self.state = BatchState::AwaitingItem(0);
        first
    }

    /// Advances after the current run completed.
    pub fn on_item_completed(&mut self) -> BatchStep {
        let (BatchState::AwaitingItem(index), Some(plan)) = (self.state, self.plan.as_ref()) else {
            return BatchStep::Single;
        };

        let len = plan.len();
        if index + 1 >= len {
            let last = plan.images[index].clone();
            info!(items = len, "Batch completed");
            self.state = BatchState::Done;
            return BatchStep::Finished { last, len };
        }

        let next = index + 1;
        debug!(index = next, items = len, "Advancing batch");
        let step = BatchStep::Next {
            index: next,
            image: plan.images[next].clone(),
            pipeline: plan.pipeline.clone(),
        };
        self.state = BatchState::AwaitingItem(next);
        step
    }

    /// Drops the batch; no further items run.
    ///
    /// # Returns
    /// Whether a batch was pending.
    pub fn abort(&mut self) -> bool {
        let was_batching = self.is_batching();
        if was_batching {
            info!(state = ?self.state, "Batch aborted");
        }
        self.state = BatchState::NotBatching;
        self.plan = None;
        was_batching
    }
}

impl Default for BatchSequencer {
    fn default() -> Self {
        Self::new()
    }
}
