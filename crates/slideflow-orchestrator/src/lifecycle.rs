//! Run lifecycle management.
//!
//! A [`Run`] is one execution of a pipeline definition against one image. Its
//! status only moves along the transitions allowed by
//! [`RunStatus::can_transition_to`].

use crate::pipeline::{ImageId, PipelineInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};
use uuid::Uuid;

/// Identifier for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Run execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, worker not started yet.
    Idle,
    /// Worker is binding inputs into the pipeline definition.
    Parsing,
    /// Pipeline is executing.
    Running,
    /// Pipeline finished and results were handed off.
    Completed,
    /// Binding, execution or persistence failed.
    Failed,
    /// Stopped by the user or superseded by a new run.
    Cancelled,
}

impl RunStatus {
    /// Checks if a run can transition to the given status.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Each arm represents a distinct transition rule
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Idle, Self::Parsing | Self::Failed | Self::Cancelled) => true,
            (Self::Parsing, Self::Running | Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            // Persistence can still fail after the worker reported completion
            (Self::Completed, Self::Failed) => true,
            _ => false,
        }
    }

    /// Whether the run can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Parsing => "parsing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One execution of a pipeline against one target image.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub pipeline: PipelineInfo,
    pub image: ImageId,
    /// Position in the batch plan, `None` for single runs.
    pub batch_index: Option<usize>,
    pub started_at: DateTime<Utc>,
    status: RunStatus,
}

impl Run {
    #[must_use]
    pub fn new(pipeline: PipelineInfo, image: ImageId, batch_index: Option<usize>) -> Self {
        Self {
            id: RunId::new(),
            pipeline,
            image,
            batch_index,
            started_at: Utc::now(),
            status: RunStatus::Idle,
        }
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Moves the run to `to`.
    ///
    /// # Returns
    /// The previous status, or `Err` with the current status if the transition
    /// is invalid.
    pub fn transition(&mut self, to: RunStatus) -> Result<RunStatus, RunStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            error!(run_id = %self.id, from = ?from, to = ?to, "Invalid run transition");
            return Err(from);
        }

        debug!(run_id = %self.id, image = %self.image, from = ?from, to = ?to, "Run transition");
        self.status = to;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn run() -> Run {
        Run::new(
            PipelineInfo {
                name: "Tissue".to_string(),
                description: String::new(),
                path: PathBuf::from("tissue.toml"),
            },
            ImageId::new("slide-1"),
            None,
        )
    }

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Idle.can_transition_to(RunStatus::Parsing));
        assert!(!RunStatus::Idle.can_transition_to(RunStatus::Running));

        assert!(RunStatus::Parsing.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Parsing.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Parsing.can_transition_to(RunStatus::Completed));

        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));

        assert!(RunStatus::Completed.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Idle));
    }

    #[test]
    fn test_run_transition() {
        let mut run = run();
        assert_eq!(run.status(), RunStatus::Idle);
        assert_eq!(run.transition(RunStatus::Parsing), Ok(RunStatus::Idle));
        assert_eq!(run.transition(RunStatus::Completed), Err(RunStatus::Parsing));
        assert_eq!(run.transition(RunStatus::Running), Ok(RunStatus::Parsing));
        assert_eq!(run.transition(RunStatus::Completed), Ok(RunStatus::Running));
        assert!(run.status().is_terminal());
    }
}
