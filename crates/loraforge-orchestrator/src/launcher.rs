//! The process-launching capability interface.
//!
//! The manager never talks to the OS directly: it is handed a
//! `ProcessLauncher` implementation. `ScriptLauncher` is the real one;
//! tests inject an in-memory fake.

use crate::error::{OrchestratorError, OrchestratorResult};
use loraforge_training::TrainingCommand;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// How long a terminated script gets to exit on SIGTERM before the
/// launcher escalates to a hard kill.
const GRACEFUL_EXIT_WINDOW: std::time::Duration = std::time::Duration::from_secs(5);

/// Structured event schema the training scripts can emit, one JSON
/// object per line. Preferred over free-text parsing wherever the
/// script supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrainerEvent {
    Progress {
        epoch: u32,
        step: u64,
        total_steps: u64,
        #[serde(default)]
        loss: Option<f64>,
        #[serde(default)]
        learning_rate: Option<f64>,
    },
    Sample {
        path: String,
    },
    Completed,
    Error {
        message: String,
    },
}

/// One unit of output from a launched process.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A free-text stdout/stderr line.
    Line(String),
    /// A line that parsed as the structured schema.
    Structured(TrainerEvent),
    /// The process exited; always the last event on the channel.
    Exited { code: Option<i32> },
}

/// A successfully spawned process: a control handle plus its event stream.
pub struct LaunchedProcess<H> {
    pub handle: H,
    pub events: mpsc::Receiver<ProcessEvent>,
}

/// Capability interface for spawning and terminating training scripts.
#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    type Handle: Send + Sync + Clone + 'static;

    /// Spawns the compiled command, returning a handle and the event
    /// stream. Output ordering on the stream matches emission order.
    async fn spawn(
        &self,
        command: &TrainingCommand,
    ) -> OrchestratorResult<LaunchedProcess<Self::Handle>>;

    /// Requests termination and waits for the OS to acknowledge it.
    async fn terminate(&self, handle: &Self::Handle) -> OrchestratorResult<()>;
}

/// Control handle for a `ScriptLauncher` child process.
#[derive(Clone)]
pub struct ScriptHandle {
    pid: Option<u32>,
    child: Arc<Mutex<Option<Child>>>,
}

impl std::fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHandle").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Launches training scripts through a Python interpreter with piped
/// stdout/stderr.
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    /// Interpreter used to run the scripts (usually `python`).
    python: String,
    /// Directory containing the training scripts.
    scripts_dir: std::path::PathBuf,
}

impl ScriptLauncher {
    #[must_use]
    pub fn new(python: impl Into<String>, scripts_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { python: python.into(), scripts_dir: scripts_dir.into() }
    }
}

/// Classifies one output line: structured JSON event or free text.
fn classify_line(line: &str) -> ProcessEvent {
    if line.trim_start().starts_with('{') {
        if let Ok(event) = serde_json::from_str::<TrainerEvent>(line) {
            return ProcessEvent::Structured(event);
        }
    }
    ProcessEvent::Line(line.to_string())
}

#[async_trait::async_trait]
impl ProcessLauncher for ScriptLauncher {
    type Handle = ScriptHandle;

    async fn spawn(
        &self,
        command: &TrainingCommand,
    ) -> OrchestratorResult<LaunchedProcess<ScriptHandle>> {
        let script_path = self.scripts_dir.join(&command.script);

        let mut cmd = Command::new(&self.python);
        cmd.arg(&script_path);
        cmd.args(&command.args);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::Launcher(format!("failed to spawn {}: {e}", command.script)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrchestratorError::Launcher("missing stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| OrchestratorError::Launcher("missing stderr handle".to_string()))?;

        let pid = child.id();
        debug!(script = %command.script, pid = ?pid, "Spawned training process");

        let handle = ScriptHandle { pid, child: Arc::new(Mutex::new(Some(child))) };
        let (tx, rx) = mpsc::channel(256);

        let stderr_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(classify_line(&line)).await.is_err() {
                    break;
                }
            }
        });

        let child_slot = Arc::clone(&handle.child);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(classify_line(&line)).await.is_err() {
                    return;
                }
            }
            // Stdout closed; reap the child and report its exit status.
            let code = {
                let mut slot = child_slot.lock().await;
                match slot.as_mut() {
                    Some(child) => match child.wait().await {
                        Ok(status) => status.code(),
                        Err(e) => {
                            warn!(error = %e, "Failed to reap training process");
                            None
                        }
                    },
                    // Already reaped by terminate().
                    None => None,
                }
            };
            let _ = tx.send(ProcessEvent::Exited { code }).await;
        });

        Ok(LaunchedProcess { handle, events: rx })
    }

    async fn terminate(&self, handle: &ScriptHandle) -> OrchestratorResult<()> {
        let mut slot = handle.child.lock().await;
        let Some(mut child) = slot.take() else {
            // Already reaped; nothing to terminate.
            return Ok(());
        };
        // Cooperative first: a graceful signal lets the script flush
        // its last checkpoint before it goes away.
        #[cfg(unix)]
        if let Some(pid) = handle.pid {
            let _ = Command::new("kill").arg("-TERM").arg(pid.to_string()).output().await;
            match tokio::time::timeout(GRACEFUL_EXIT_WINDOW, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(pid = pid, status = ?status.code(), "Training process exited on SIGTERM");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(pid = pid, error = %e, "Failed waiting for training process");
                }
                Err(_) => {
                    warn!(pid = pid, "Training process ignored SIGTERM; escalating to kill");
                }
            }
        }

        child
            .kill()
            .await
            .map_err(|e| OrchestratorError::Launcher(format!("failed to terminate: {e}")))?;
        debug!(pid = ?handle.pid, "Killed training process");
        Ok(())
    }
}
