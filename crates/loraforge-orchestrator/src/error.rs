use crate::process::{ProcessId, ProcessStatus};
use thiserror::Error;

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Validation reported blocking errors; nothing was spawned.
    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    /// The external process could not be launched.
    #[error("failed to spawn training process {id}: {message}")]
    Spawn { id: ProcessId, message: String },

    #[error("unknown training process: {0}")]
    UnknownProcess(ProcessId),

    /// Cancel (or another transition) was requested on a process that
    /// already reached a terminal state.
    #[error("training process {id} already finished with status {status}")]
    AlreadyFinished { id: ProcessId, status: ProcessStatus },

    #[error("launcher error: {0}")]
    Launcher(String),

    #[error(transparent)]
    Training(#[from] loraforge_training::TrainingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
