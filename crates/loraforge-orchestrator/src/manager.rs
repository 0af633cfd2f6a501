//! The lifecycle manager: owns every `TrainingProcess` record, applies
//! state transitions, and fans parsed progress out to subscribers.
//!
//! All mutable state (the process map, the launcher handles, the
//! subscriber channels) lives here, constructed once and shared by
//! handle; nothing else in the workspace mutates it.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::launcher::{ProcessEvent, ProcessLauncher};
use crate::process::{ProcessId, ProcessStatus, TrainingProcess, TrainingProgress};
use crate::progress::{ParseOutcome, ProgressParser};
use chrono::{Duration, Utc};
use loraforge_training::{compile, validate, TrainingConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

/// Terminal records older than this are dropped by `purge_finished`.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// The retention window callers normally pass to `purge_finished`.
#[must_use]
pub fn default_retention() -> Duration {
    Duration::hours(DEFAULT_RETENTION_HOURS)
}

/// Progress events buffered per subscriber before lagging.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

struct Shared<H> {
    processes: RwLock<HashMap<ProcessId, TrainingProcess>>,
    channels: RwLock<HashMap<ProcessId, broadcast::Sender<TrainingProgress>>>,
    handles: RwLock<HashMap<ProcessId, H>>,
}

impl<H> Shared<H> {
    /// Applies a status transition if the state machine allows it.
    ///
    /// Returns the previous status on success, the current one on
    /// rejection. Progress delivery takes the same lock, so a
    /// subscriber never observes a snapshot published after the record
    /// went terminal for another reason.
    async fn transition(
        &self,
        id: &ProcessId,
        to: ProcessStatus,
        error: Option<String>,
    ) -> Result<ProcessStatus, ProcessStatus> {
        let mut processes = self.processes.write().await;
        let Some(record) = processes.get_mut(id) else {
            return Err(ProcessStatus::Failed);
        };
        let from = record.status;
        if !from.can_transition_to(to) {
            debug!(id = %id, from = %from, to = %to, "Rejected state transition");
            return Err(from);
        }
        record.status = to;
        if let Some(message) = error {
            record.error = Some(message);
        }
        if to.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        info!(id = %id, from = %from, to = %to, "Training process state transition");
        Ok(from)
    }

    async fn cancel_requested(&self, id: &ProcessId) -> bool {
        let processes = self.processes.read().await;
        processes.get(id).is_some_and(|record| record.cancel_requested)
    }
}

/// Orchestrates training runs on top of an injected `ProcessLauncher`.
pub struct LifecycleManager<L: ProcessLauncher> {
    launcher: Arc<L>,
    shared: Arc<Shared<L::Handle>>,
}

impl<L: ProcessLauncher> std::fmt::Debug for LifecycleManager<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager").finish_non_exhaustive()
    }
}

impl<L: ProcessLauncher> LifecycleManager<L> {
    #[must_use]
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
            shared: Arc::new(Shared {
                processes: RwLock::new(HashMap::new()),
                channels: RwLock::new(HashMap::new()),
                handles: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validates, compiles, and launches one training run.
    ///
    /// Fails fast on validation errors without registering anything.
    /// A spawn failure registers the record as `Failed` (so the UI can
    /// show it) and surfaces the error.
    ///
    /// # Arguments
    /// * `config` - The training intent to run
    ///
    /// # Returns
    /// Returns the new process id on success, or an error if validation
    /// or the spawn failed.
    pub async fn start(&self, config: TrainingConfig) -> OrchestratorResult<ProcessId> {
        let report = validate(&config);
        if !report.is_valid() {
            return Err(OrchestratorError::InvalidConfig(report.errors.join("; ")));
        }
        for warning in &report.warnings {
            warn!(warning = %warning, "Training config warning");
        }

        let command = compile(&config)?;
        let record = TrainingProcess::new(config);
        let id = record.id.clone();

        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        self.shared.processes.write().await.insert(id.clone(), record);
        self.shared.channels.write().await.insert(id.clone(), progress_tx.clone());

        let launched = match self.launcher.spawn(&command).await {
            Ok(launched) => launched,
            Err(e) => {
                let message = e.to_string();
                let _ = self.shared.transition(&id, ProcessStatus::Failed, Some(message.clone())).await;
                return Err(OrchestratorError::Spawn { id, message });
            }
        };

        let handle = launched.handle.clone();
        self.shared.handles.write().await.insert(id.clone(), launched.handle);
        let _ = self.shared.transition(&id, ProcessStatus::Running, None).await;

        // A cancel that arrived while the spawn was in flight found no
        // handle to terminate; honor it now that one exists, or the
        // external process outlives its cancelled record.
        if self.shared.cancel_requested(&id).await {
            let _ = self.launcher.terminate(&handle).await;
            let _ = self.shared.transition(&id, ProcessStatus::Cancelled, None).await;
        }

        let shared = Arc::clone(&self.shared);
        let ingest_id = id.clone();
        tokio::spawn(async move {
            ingest(shared, ingest_id, progress_tx, launched.events).await;
        });

        Ok(id)
    }

    /// Requests cooperative cancellation of a run.
    ///
    /// Only valid while `Starting` or `Running`; cancelling a process
    /// that already finished is an error, never a silent success.
    ///
    /// # Arguments
    /// * `id` - The process id to cancel
    ///
    /// # Returns
    /// Returns `Ok(())` once the cancellation is acknowledged, or an
    /// error if the process is unknown or already terminal.
    pub async fn cancel(&self, id: &ProcessId) -> OrchestratorResult<()> {
        {
            let mut processes = self.shared.processes.write().await;
            let record = processes
                .get_mut(id)
                .ok_or_else(|| OrchestratorError::UnknownProcess(id.clone()))?;
            if record.status.is_terminal() {
                return Err(OrchestratorError::AlreadyFinished {
                    id: id.clone(),
                    status: record.status,
                });
            }
            record.cancel_requested = true;
        }

        let handle = self.shared.handles.read().await.get(id).cloned();
        if let Some(handle) = handle {
            self.launcher.terminate(&handle).await?;
        }

        match self.shared.transition(id, ProcessStatus::Cancelled, None).await {
            Ok(_) => Ok(()),
            // The ingestion task may have applied the cancel first when
            // the exit event raced the acknowledgement.
            Err(ProcessStatus::Cancelled) => Ok(()),
            Err(status) => {
                Err(OrchestratorError::AlreadyFinished { id: id.clone(), status })
            }
        }
    }

    /// Subscribes to progress updates for one run. Late subscribers see
    /// only future updates; there is no replay.
    ///
    /// # Arguments
    /// * `id` - The process id to subscribe to
    ///
    /// # Returns
    /// Returns a receiver for progress snapshots, or an error if the
    /// process is unknown.
    pub async fn subscribe(
        &self,
        id: &ProcessId,
    ) -> OrchestratorResult<broadcast::Receiver<TrainingProgress>> {
        let channels = self.shared.channels.read().await;
        channels
            .get(id)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| OrchestratorError::UnknownProcess(id.clone()))
    }

    /// Read-only snapshot of one run.
    pub async fn get(&self, id: &ProcessId) -> Option<TrainingProcess> {
        self.shared.processes.read().await.get(id).cloned()
    }

    /// Read-only snapshots of every non-terminal run.
    pub async fn active(&self) -> Vec<TrainingProcess> {
        self.shared
            .processes
            .read()
            .await
            .values()
            .filter(|record| !record.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Drops terminal records older than `retention` along with their
    /// channels and handles. Callers normally pass `default_retention()`.
    pub async fn purge_finished(&self, retention: Duration) {
        let cutoff = Utc::now() - retention;
        let purged: Vec<ProcessId> = {
            let mut processes = self.shared.processes.write().await;
            let stale: Vec<ProcessId> = processes
                .iter()
                .filter(|(_, record)| {
                    record.status.is_terminal()
                        && record.finished_at.is_some_and(|finished| finished < cutoff)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                processes.remove(id);
            }
            stale
        };
        if purged.is_empty() {
            return;
        }
        let mut channels = self.shared.channels.write().await;
        let mut handles = self.shared.handles.write().await;
        for id in &purged {
            channels.remove(id);
            handles.remove(id);
        }
        debug!(count = purged.len(), "Purged finished training processes");
    }
}

/// Drives one process's event stream: parses, publishes, and applies
/// the terminal transition when the stream says so.
async fn ingest<H>(
    shared: Arc<Shared<H>>,
    id: ProcessId,
    progress_tx: broadcast::Sender<TrainingProgress>,
    mut events: mpsc::Receiver<ProcessEvent>,
) {
    let mut parser = ProgressParser::new(0);

    while let Some(event) = events.recv().await {
        if let ProcessEvent::Exited { code } = &event {
            let outcome = if shared.cancel_requested(&id).await {
                (ProcessStatus::Cancelled, None)
            } else if *code == Some(0) {
                (ProcessStatus::Completed, None)
            } else {
                let message = match code {
                    Some(code) => format!("training process exited with status {code}"),
                    None => "training process terminated by signal".to_string(),
                };
                (ProcessStatus::Failed, Some(message))
            };
            // Rejected when a stream sentinel or a cancel got there
            // first; the sentinel is authoritative over the exit code.
            let _ = shared.transition(&id, outcome.0, outcome.1).await;
            continue;
        }

        match parser.feed(&event) {
            ParseOutcome::Updated(snapshot) => {
                // Snapshot write and fan-out happen under the map lock
                // so delivery order matches transition order.
                let mut processes = shared.processes.write().await;
                match processes.get_mut(&id) {
                    Some(record) if !record.status.is_terminal() => {
                        record.progress = Some(snapshot.clone());
                        let _ = progress_tx.send(snapshot);
                    }
                    _ => {}
                }
            }
            ParseOutcome::Finished => {
                let _ = shared.transition(&id, ProcessStatus::Completed, None).await;
            }
            ParseOutcome::Failed(message) => {
                let _ = shared.transition(&id, ProcessStatus::Failed, Some(message)).await;
            }
            ParseOutcome::Ignored => {
                // Keep the latest log lines visible even when the line
                // carried no parsable progress.
                let mut processes = shared.processes.write().await;
                if let Some(record) = processes.get_mut(&id) {
                    if !record.status.is_terminal() {
                        record.progress = Some(parser.snapshot());
                    }
                }
            }
        }
    }

    debug!(id = %id, "Event stream closed");
}
