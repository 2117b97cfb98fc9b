//! Tool Execution Engine
//!
//! Starts one external process per run, streams its output to the
//! [`EventBus`] and the [`RunStore`] in emission order, and finalizes the
//! run row before announcing completion.
//!
//! # Run lifecycle
//!
//! 1. `start_run` validates the tool and target, inserts a `running` row,
//!    opens the run's topic and registers it in the active table.
//! 2. A dedicated task spawns the process. A spawn failure becomes the
//!    run's captured output and a `failed` status with exit code `-1`.
//! 3. Every output line is appended to the in-flight buffer, then published.
//! 4. On exit the row is finalized, the run leaves the active table, and a
//!    single `run-completed` event closes the topic.

mod bus;
mod command;
pub(crate) mod process;

pub use bus::{EventBus, RunEvent, RunSubscription};
pub use command::{quote_arg, CommandSpec};
pub use process::exit_code;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{NserError, Result};
use crate::metrics;
use crate::storage::{now_timestamp, CommandRun, NewRun, RunStatus, RunStore, SENTINEL_EXIT_CODE};
use crate::tools::ToolRegistry;
use process::SpawnedProcess;

// Reading stops this long after exit even if a grandchild still holds the pipe
const DRAIN_AFTER_EXIT: Duration = Duration::from_secs(2);

const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(100);

/// Returned by `start_run` as soon as the run row exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub run_id: i64,
    pub command_line: String,
}

// Entry in the active-run table, present while the process is alive
struct ActiveRun {
    workspace_id: i64,
    cancel: Option<oneshot::Sender<()>>,
}

struct Outcome {
    status: RunStatus,
    exit_code: i32,
}

struct EngineInner {
    registry: Arc<ToolRegistry>,
    runs: RunStore,
    bus: EventBus,
    config: EngineConfig,
    active: Mutex<HashMap<i64, ActiveRun>>,
    // Held while a run row is created and registered, and while runs of the
    // workspace are deleted
    workspace_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

/// Launches and supervises tool runs
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("active_runs", &self.active_runs())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        runs: RunStore,
        bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                runs,
                bus,
                config,
                active: Mutex::new(HashMap::new()),
                workspace_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub(crate) fn runs(&self) -> &RunStore {
        &self.inner.runs
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Start a run without waiting for any output
    ///
    /// # Errors
    ///
    /// `UnknownTool`, `InvalidTarget` or `WorkspaceNotFound`, all before any
    /// row is created. Spawn failures are reported through the run itself.
    pub async fn start_run(
        &self,
        workspace_id: i64,
        tool_name: &str,
        target: &str,
        extra_args: &[String],
    ) -> Result<StartedRun> {
        let (started, _) = self
            .start(workspace_id, tool_name, target, extra_args, false)
            .await?;
        Ok(started)
    }

    /// Like [`Engine::start_run`], with a subscription taken before the
    /// process exists so that no line is missed
    pub async fn start_run_attached(
        &self,
        workspace_id: i64,
        tool_name: &str,
        target: &str,
        extra_args: &[String],
    ) -> Result<(StartedRun, RunSubscription)> {
        let (started, subscription) = self
            .start(workspace_id, tool_name, target, extra_args, true)
            .await?;
        match subscription {
            Some(subscription) => Ok((started, subscription)),
            None => Err(NserError::Task("subscription was not created".to_string())),
        }
    }

    async fn start(
        &self,
        workspace_id: i64,
        tool_name: &str,
        target: &str,
        extra_args: &[String],
        attach: bool,
    ) -> Result<(StartedRun, Option<RunSubscription>)> {
        let def = self
            .inner
            .registry
            .lookup(tool_name)
            .ok_or_else(|| NserError::UnknownTool(tool_name.to_string()))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(NserError::InvalidTarget);
        }

        let spec = CommandSpec::build(def, target, extra_args);
        let command_line = spec.command_line();

        // Row and active entry become visible to deleters together
        let _guard = self.lock_workspace(workspace_id).await;
        let run = self
            .inner
            .runs
            .create(NewRun {
                workspace_id,
                tool_name: def.name.clone(),
                target: target.to_string(),
                args: extra_args.to_vec(),
                command_line: command_line.clone(),
            })
            .await?;
        let run_id = run.id;

        self.inner.bus.open_topic(run_id);
        let subscription = attach.then(|| self.inner.bus.subscribe(run_id));

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.inner.active_table().insert(
            run_id,
            ActiveRun {
                workspace_id,
                cancel: Some(cancel_tx),
            },
        );
        metrics::RUNS_STARTED_TOTAL
            .with_label_values(&[def.name.as_str()])
            .inc();
        metrics::ACTIVE_RUNS.inc();

        info!(run_id, workspace_id, tool = %def.name, "Starting run: {}", command_line);

        let inner = Arc::clone(&self.inner);
        let tool = def.name.clone();
        tokio::spawn(async move {
            inner.drive(run_id, tool, spec, cancel_rx).await;
        });

        Ok((
            StartedRun {
                run_id,
                command_line,
            },
            subscription,
        ))
    }

    /// Stop a live run; it finalizes as `cancelled`
    ///
    /// Returns once the request has been delivered. The completion event
    /// follows when the process has exited and its output is drained.
    pub async fn cancel_run(&self, run_id: i64) -> Result<()> {
        let request = {
            let mut active = self.inner.active_table();
            active.get_mut(&run_id).map(|run| run.cancel.take())
        };
        match request {
            Some(Some(cancel)) => {
                info!(run_id, "Cancelling run");
                // The receiver only disappears once the run is finishing anyway
                let _ = cancel.send(());
                Ok(())
            }
            // Already being cancelled
            Some(None) => Ok(()),
            None => {
                self.inner.runs.get(run_id).await?;
                Err(NserError::RunNotActive(run_id))
            }
        }
    }

    pub async fn get_run(&self, run_id: i64) -> Result<CommandRun> {
        self.inner.runs.get(run_id).await
    }

    /// Output captured so far; never waits for the run to finish
    pub async fn get_output(&self, run_id: i64) -> Result<String> {
        self.inner.runs.get_output(run_id).await
    }

    /// Run metadata for a workspace, newest first
    pub async fn list_history(&self, workspace_id: i64) -> Result<Vec<CommandRun>> {
        self.inner.runs.list_by_workspace(workspace_id).await
    }

    /// Delete a finished run and its output
    ///
    /// # Errors
    ///
    /// `RunActive` while the process is alive, `RunNotFound` if absent.
    pub async fn delete_run(&self, run_id: i64) -> Result<()> {
        let run = self.inner.runs.get(run_id).await?;
        let _guard = self.lock_workspace(run.workspace_id).await;
        if self.is_active(run_id) {
            return Err(NserError::RunActive(run_id));
        }
        self.inner.runs.delete(run_id).await?;
        debug!(run_id, "Deleted run");
        Ok(())
    }

    /// Exclusive access to a workspace's run set
    ///
    /// While held, no run of the workspace can be created, so the active
    /// table and the stored rows agree for as long as the guard lives.
    pub(crate) async fn lock_workspace(&self, workspace_id: i64) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.inner
                .workspace_locks
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .entry(workspace_id)
                .or_default(),
        );
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted workspace
    pub(crate) fn forget_workspace(&self, workspace_id: i64) {
        self.inner
            .workspace_locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&workspace_id);
    }

    /// Ids of runs whose process is alive, ascending
    pub fn active_runs(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.active_table().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_active(&self, run_id: i64) -> bool {
        self.inner.active_table().contains_key(&run_id)
    }

    /// Lowest active run id in a workspace, if any
    pub fn active_run_in_workspace(&self, workspace_id: i64) -> Option<i64> {
        self.inner
            .active_table()
            .iter()
            .filter(|(_, run)| run.workspace_id == workspace_id)
            .map(|(id, _)| *id)
            .min()
    }

    pub fn subscribe(&self, run_id: i64) -> RunSubscription {
        self.inner.bus.subscribe(run_id)
    }

    pub fn subscribe_all(&self) -> RunSubscription {
        self.inner.bus.subscribe_all()
    }
}

impl EngineInner {
    fn active_table(&self) -> std::sync::MutexGuard<'_, HashMap<i64, ActiveRun>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn drive(
        &self,
        run_id: i64,
        tool: String,
        spec: CommandSpec,
        cancel: oneshot::Receiver<()>,
    ) {
        let started = Instant::now();
        let outcome = match process::spawn(&spec, self.config.output_channel_capacity) {
            Ok(spawned) => self.supervise(run_id, spawned, cancel).await,
            Err(e) => {
                warn!(run_id, "Failed to start {}: {}", spec.program, e);
                self.capture(run_id, &format!("failed to start {}: {}", spec.program, e));
                Outcome {
                    status: RunStatus::Failed,
                    exit_code: SENTINEL_EXIT_CODE,
                }
            }
        };
        self.complete(run_id, &tool, outcome, started.elapsed()).await;
    }

    /// Pump output until the process has exited and the pipe is drained
    async fn supervise(
        &self,
        run_id: i64,
        spawned: SpawnedProcess,
        mut cancel: oneshot::Receiver<()>,
    ) -> Outcome {
        let SpawnedProcess {
            mut child,
            group,
            mut lines,
        } = spawned;
        let grace = Duration::from_millis(self.config.cancel_grace_ms);

        let mut exit = None;
        let mut lines_open = true;
        let mut cancel_armed = true;
        let mut cancelled = false;
        let mut kill_at: Option<tokio::time::Instant> = None;
        let mut drain_until: Option<tokio::time::Instant> = None;

        while exit.is_none() || lines_open {
            // Control branches first so a flooding pipe cannot starve them
            tokio::select! {
                biased;

                request = &mut cancel, if cancel_armed && exit.is_none() => {
                    cancel_armed = false;
                    if request.is_ok() {
                        cancelled = true;
                        if let Err(e) = process::terminate(&mut child, group) {
                            warn!(run_id, "Failed to signal process: {}", e);
                        }
                        kill_at = Some(tokio::time::Instant::now() + grace);
                    }
                }

                _ = tokio::time::sleep_until(kill_at.unwrap_or_else(tokio::time::Instant::now)),
                    if kill_at.is_some() && exit.is_none() => {
                    kill_at = None;
                    warn!(run_id, "Process ignored SIGTERM for {:?}, killing", grace);
                    if let Err(e) = process::kill(&mut child, group) {
                        warn!(run_id, "Failed to kill process: {}", e);
                    }
                }

                status = child.wait(), if exit.is_none() => {
                    exit = Some(status);
                    drain_until = Some(tokio::time::Instant::now() + DRAIN_AFTER_EXIT);
                }

                _ = tokio::time::sleep_until(drain_until.unwrap_or_else(tokio::time::Instant::now)),
                    if drain_until.is_some() && exit.is_some() && lines_open => {
                    warn!(run_id, "Output pipe still open {:?} after exit, closing it", DRAIN_AFTER_EXIT);
                    if let Err(e) = process::kill_leftovers(group) {
                        warn!(run_id, "Failed to kill leftover processes: {}", e);
                    }
                    lines_open = false;
                }

                line = lines.recv(), if lines_open => match line {
                    Some(line) => self.capture(run_id, &line),
                    None => lines_open = false,
                },
            }
        }

        match exit {
            Some(Ok(status)) => {
                let code = process::exit_code(&status);
                let status = if cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::from_exit_code(code)
                };
                Outcome {
                    status,
                    exit_code: code,
                }
            }
            Some(Err(e)) => {
                self.capture(run_id, &format!("failed to wait for process: {}", e));
                Outcome {
                    status: if cancelled {
                        RunStatus::Cancelled
                    } else {
                        RunStatus::Failed
                    },
                    exit_code: SENTINEL_EXIT_CODE,
                }
            }
            None => Outcome {
                status: RunStatus::Failed,
                exit_code: SENTINEL_EXIT_CODE,
            },
        }
    }

    /// Write the final row, retrying transient storage failures
    ///
    /// When every attempt fails the status alone is saved, so the row never
    /// stays `running` after its process is gone.
    async fn persist_outcome(&self, run_id: i64, outcome: &Outcome) {
        let completed_at = now_timestamp();
        for attempt in 1..=FINALIZE_ATTEMPTS {
            let result = self
                .runs
                .finalize(run_id, outcome.status, outcome.exit_code, completed_at.clone())
                .await;
            match result {
                Ok(_) => return,
                Err(e @ (NserError::Storage(_) | NserError::Task(_))) => {
                    warn!(run_id, attempt, "Failed to finalize run: {}", e);
                    if attempt < FINALIZE_ATTEMPTS {
                        tokio::time::sleep(FINALIZE_BACKOFF * attempt).await;
                    }
                }
                Err(e) => {
                    error!(run_id, "Failed to finalize run: {}", e);
                    return;
                }
            }
        }

        match self
            .runs
            .finalize_status(run_id, outcome.status, outcome.exit_code, completed_at)
            .await
        {
            Ok(()) => error!(run_id, "Saved run status without its output"),
            Err(e) => error!(run_id, "Failed to record run status: {}", e),
        }
    }

    /// Record a line, then hand it to live subscribers
    fn capture(&self, run_id: i64, line: &str) {
        if let Err(e) = self.runs.append_output(run_id, line) {
            error!(run_id, "Failed to buffer output line: {}", e);
        }
        metrics::OUTPUT_LINES_TOTAL.inc();
        self.bus.publish(RunEvent::OutputLine {
            run_id,
            line: line.to_string(),
        });
    }

    async fn complete(&self, run_id: i64, tool: &str, outcome: Outcome, elapsed: Duration) {
        self.persist_outcome(run_id, &outcome).await;

        self.active_table().remove(&run_id);
        metrics::ACTIVE_RUNS.dec();
        metrics::RUNS_FINISHED_TOTAL
            .with_label_values(&[tool, outcome.status.as_str()])
            .inc();
        metrics::RUN_DURATION_SECONDS
            .with_label_values(&[tool])
            .observe(elapsed.as_secs_f64());

        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!(
            run_id,
            tool,
            status = %outcome.status,
            exit_code = outcome.exit_code,
            duration_ms,
            "Run finished"
        );

        self.bus.publish(RunEvent::RunCompleted {
            run_id,
            status: outcome.status,
            exit_code: outcome.exit_code,
            duration_ms,
        });
        self.bus.close_topic(run_id);
    }
}
