//! Per-run state: identities, the status state machine, and the
//! progress snapshot.

use chrono::{DateTime, Utc};
use loraforge_training::TrainingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Progress log lines kept per process; oldest are dropped beyond this.
pub const MAX_LOG_LINES: usize = 500;

/// Identifier for one training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Run status. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Checks whether a transition to `to` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // From Starting: spawn success or failure, or an early cancel.
            (Self::Starting, Self::Running | Self::Failed | Self::Cancelled) => true,
            // From Running: normal exit, abnormal exit, or user cancel.
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            // Terminal states never transition out.
            _ => false,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Latest-known progress snapshot for one run.
///
/// Every field except `logs` and `samples_generated` is overwritten on
/// each parsed update; those two accumulate (logs bounded).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub epoch: u32,
    pub step: u64,
    pub total_steps: u64,
    pub loss: Option<f64>,
    pub learning_rate: Option<f64>,
    pub elapsed_secs: u64,
    pub eta_secs: Option<u64>,
    pub samples_generated: Vec<PathBuf>,
    pub logs: Vec<String>,
}

impl TrainingProgress {
    /// Appends a raw log line, dropping the oldest past the cap.
    pub fn push_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
        if self.logs.len() > MAX_LOG_LINES {
            self.logs.remove(0);
        }
    }
}

/// One training run: the unit of orchestration.
///
/// Maps to exactly one external OS process. Transitions are owned by
/// the `LifecycleManager`; once terminal, the record is immutable until
/// it is purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingProcess {
    pub id: ProcessId,
    pub config: TrainingConfig,
    pub status: ProcessStatus,
    pub progress: Option<TrainingProgress>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when a cancel has been requested but not yet acknowledged,
    /// so an exit-event race resolves to `Cancelled`, not `Failed`.
    #[serde(skip)]
    pub(crate) cancel_requested: bool,
}

impl TrainingProcess {
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            id: ProcessId::new(),
            config,
            status: ProcessStatus::Starting,
            progress: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            cancel_requested: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ProcessStatus::{Cancelled, Completed, Failed, Running, Starting};

        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Failed));
        assert!(Starting.can_transition_to(Cancelled));
        assert!(!Starting.can_transition_to(Completed));

        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Starting));

        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for target in [Starting, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_log_retention_is_bounded() {
        let mut progress = TrainingProgress::default();
        for i in 0..(MAX_LOG_LINES + 10) {
            progress.push_log(format!("line {i}"));
        }
        assert_eq!(progress.logs.len(), MAX_LOG_LINES);
        assert_eq!(progress.logs[0], "line 10");
    }
}
