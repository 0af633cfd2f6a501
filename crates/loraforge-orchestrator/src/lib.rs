//! LoRAForge Orchestrator
//!
//! Lifecycle management for external training runs:
//! - The per-run state machine (`process`)
//! - The `ProcessLauncher` capability interface and the real
//!   `ScriptLauncher` on top of `tokio::process` (`launcher`)
//! - Best-effort progress stream parsing (`progress`)
//! - The `LifecycleManager` tying it together (`manager`)

pub mod error;
pub mod launcher;
pub mod manager;
pub mod process;
pub mod progress;

pub use error::{OrchestratorError, OrchestratorResult};
pub use launcher::{LaunchedProcess, ProcessEvent, ProcessLauncher, ScriptLauncher, TrainerEvent};
pub use manager::{default_retention, LifecycleManager, DEFAULT_RETENTION_HOURS};
pub use process::{ProcessId, ProcessStatus, TrainingProcess, TrainingProgress};
pub use progress::{ParseOutcome, ProgressParser};
