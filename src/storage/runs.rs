//! Run Store
//!
//! Durable record of every tool invocation. A run's output lives in an
//! in-memory buffer while the process is alive and is written to
//! `run_output` in the same transaction that finalizes the row, so a
//! finalized run's output never changes afterwards.

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::{now_timestamp, Database};
use crate::error::{NserError, Result};

/// Output recorded for runs found `running` when the store is opened
pub const INTERRUPTED_MESSAGE: &str = "interrupted: nser exited before the run completed";

/// Exit code recorded when the process never produced one
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal status for a process that exited on its own
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Self::Completed
        } else {
            Self::Failed
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Run metadata, without the captured output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRun {
    pub id: i64,
    pub workspace_id: i64,
    pub tool_name: String,
    pub target: String,
    /// Caller-supplied extra arguments
    pub args: Vec<String>,
    pub command_line: String,
    pub status: RunStatus,
    /// `None` while running
    pub exit_code: Option<i32>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Everything needed to insert a run row
#[derive(Debug, Clone)]
pub struct NewRun {
    pub workspace_id: i64,
    pub tool_name: String,
    pub target: String,
    pub args: Vec<String>,
    pub command_line: String,
}

const COLUMNS: &str = "id, workspace_id, tool_name, target, args, command_line, status, \
                       exit_code, started_at, completed_at";

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<CommandRun> {
    let args: String = row.get(4)?;
    let args: Vec<String> = serde_json::from_str(&args)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let status: String = row.get(6)?;
    let status = status.parse::<RunStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(CommandRun {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        tool_name: row.get(2)?,
        target: row.get(3)?,
        args,
        command_line: row.get(5)?,
        status,
        exit_code: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

/// Persistence for command runs and their captured output
#[derive(Debug, Clone)]
pub struct RunStore {
    db: Database,
    // run id -> output captured so far, present only while the run is live
    in_flight: Arc<Mutex<HashMap<i64, String>>>,
}

impl RunStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn buffers(&self) -> std::sync::MutexGuard<'_, HashMap<i64, String>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert a `running` row and open its output buffer
    ///
    /// # Errors
    ///
    /// `WorkspaceNotFound` if the workspace does not exist; nothing is inserted.
    pub async fn create(&self, run: NewRun) -> Result<CommandRun> {
        let args_json = serde_json::to_string(&run.args)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let created = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let workspace: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM workspaces WHERE id = ?1",
                        params![run.workspace_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if workspace.is_none() {
                    return Err(NserError::WorkspaceNotFound(run.workspace_id));
                }

                let started_at = now_timestamp();
                tx.execute(
                    "INSERT INTO command_runs (workspace_id, tool_name, target, args, command_line, \
                     status, exit_code, started_at, completed_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, NULL)",
                    params![
                        run.workspace_id,
                        run.tool_name,
                        run.target,
                        args_json,
                        run.command_line,
                        RunStatus::Running.as_str(),
                        started_at,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO run_output (run_id, content) VALUES (?1, '')",
                    params![id],
                )?;
                tx.commit()?;

                Ok(CommandRun {
                    id,
                    workspace_id: run.workspace_id,
                    tool_name: run.tool_name,
                    target: run.target,
                    args: run.args,
                    command_line: run.command_line,
                    status: RunStatus::Running,
                    exit_code: None,
                    started_at,
                    completed_at: None,
                })
            })
            .await?;

        self.buffers().insert(created.id, String::new());
        Ok(created)
    }

    /// Append one line to a live run's buffer
    ///
    /// Lines are stored newline-terminated in the order they are appended.
    pub fn append_output(&self, id: i64, line: &str) -> Result<()> {
        let mut buffers = self.buffers();
        let buffer = buffers.get_mut(&id).ok_or(NserError::RunNotActive(id))?;
        buffer.push_str(line);
        buffer.push('\n');
        Ok(())
    }

    /// Write the terminal status and the full captured output
    ///
    /// This is the last write a run receives.
    ///
    /// # Errors
    ///
    /// `RunNotFound` if the row is gone, `RunNotActive` if it already left
    /// `running`.
    pub async fn finalize(
        &self,
        id: i64,
        status: RunStatus,
        exit_code: i32,
        completed_at: String,
    ) -> Result<CommandRun> {
        let output = self.buffers().get(&id).cloned().unwrap_or_default();

        let result = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE command_runs SET status = ?1, exit_code = ?2, completed_at = ?3 \
                     WHERE id = ?4 AND status = 'running'",
                    params![status.as_str(), exit_code, completed_at, id],
                )?;
                if changed == 0 {
                    let exists: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM command_runs WHERE id = ?1",
                            params![id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    return Err(match exists {
                        Some(_) => NserError::RunNotActive(id),
                        None => NserError::RunNotFound(id),
                    });
                }
                tx.execute(
                    "INSERT INTO run_output (run_id, content) VALUES (?1, ?2) \
                     ON CONFLICT(run_id) DO UPDATE SET content = excluded.content",
                    params![id, output],
                )?;
                let run = tx.query_row(
                    &format!("SELECT {COLUMNS} FROM command_runs WHERE id = ?1"),
                    params![id],
                    row_to_run,
                )?;
                tx.commit()?;
                Ok(run)
            })
            .await;

        if !matches!(result, Err(NserError::Storage(_)) | Err(NserError::Task(_))) {
            self.buffers().remove(&id);
        }
        result
    }

    /// Record only the final status and drop the in-flight buffer
    ///
    /// Fallback for when `finalize` keeps failing; the buffered output is
    /// lost but the row no longer reads as `running`.
    pub async fn finalize_status(
        &self,
        id: i64,
        status: RunStatus,
        exit_code: i32,
        completed_at: String,
    ) -> Result<()> {
        let result = self
            .db
            .call(move |conn| {
                conn.execute(
                    "UPDATE command_runs SET status = ?1, exit_code = ?2, completed_at = ?3 \
                     WHERE id = ?4 AND status = 'running'",
                    params![status.as_str(), exit_code, completed_at, id],
                )?;
                Ok(())
            })
            .await;
        self.buffers().remove(&id);
        result
    }

    pub async fn get(&self, id: i64) -> Result<CommandRun> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM command_runs WHERE id = ?1"),
                    params![id],
                    row_to_run,
                )
                .optional()?
                .ok_or(NserError::RunNotFound(id))
            })
            .await
    }

    /// Captured output: the live buffer for a running run, the stored text otherwise
    pub async fn get_output(&self, id: i64) -> Result<String> {
        if let Some(buffer) = self.buffers().get(&id) {
            return Ok(buffer.clone());
        }
        self.db
            .call(move |conn| {
                let row: Option<Option<String>> = conn
                    .query_row(
                        "SELECT o.content FROM command_runs r \
                         LEFT JOIN run_output o ON o.run_id = r.id WHERE r.id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match row {
                    Some(content) => Ok(content.unwrap_or_default()),
                    None => Err(NserError::RunNotFound(id)),
                }
            })
            .await
    }

    /// Run metadata for a workspace, newest first
    pub async fn list_by_workspace(&self, workspace_id: i64) -> Result<Vec<CommandRun>> {
        self.db
            .call(move |conn| {
                let workspace: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM workspaces WHERE id = ?1",
                        params![workspace_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if workspace.is_none() {
                    return Err(NserError::WorkspaceNotFound(workspace_id));
                }
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM command_runs WHERE workspace_id = ?1 \
                     ORDER BY started_at DESC, id DESC"
                ))?;
                let rows = stmt.query_map(params![workspace_id], row_to_run)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    /// Remove a run row and its output
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.db
            .call(move |conn| {
                let changed =
                    conn.execute("DELETE FROM command_runs WHERE id = ?1", params![id])?;
                if changed == 0 {
                    return Err(NserError::RunNotFound(id));
                }
                Ok(())
            })
            .await?;
        self.buffers().remove(&id);
        Ok(())
    }

    /// Remove every run of a workspace, returning how many rows went
    pub async fn delete_by_workspace(&self, workspace_id: i64) -> Result<usize> {
        let ids = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids = {
                    let mut stmt =
                        tx.prepare("SELECT id FROM command_runs WHERE workspace_id = ?1")?;
                    let rows = stmt.query_map(params![workspace_id], |row| row.get::<_, i64>(0))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                tx.execute(
                    "DELETE FROM command_runs WHERE workspace_id = ?1",
                    params![workspace_id],
                )?;
                tx.commit()?;
                Ok(ids)
            })
            .await?;

        let mut buffers = self.buffers();
        for id in &ids {
            buffers.remove(id);
        }
        Ok(ids.len())
    }

    /// Fail every row left `running` by a previous process
    ///
    /// Only meaningful at startup, before any run is created.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self
            .db
            .call(|conn| {
                let tx = conn.transaction()?;
                let ids = {
                    let mut stmt =
                        tx.prepare("SELECT id FROM command_runs WHERE status = 'running'")?;
                    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                let now = now_timestamp();
                for id in &ids {
                    tx.execute(
                        "UPDATE command_runs SET status = ?1, exit_code = ?2, completed_at = ?3 \
                         WHERE id = ?4",
                        params![RunStatus::Failed.as_str(), SENTINEL_EXIT_CODE, now, id],
                    )?;
                    tx.execute(
                        "INSERT INTO run_output (run_id, content) VALUES (?1, ?2) \
                         ON CONFLICT(run_id) DO UPDATE SET content = run_output.content || ?2",
                        params![id, format!("{INTERRUPTED_MESSAGE}\n")],
                    )?;
                }
                tx.commit()?;
                Ok(ids.len())
            })
            .await?;

        if recovered > 0 {
            tracing::warn!("Marked {} interrupted runs as failed", recovered);
        }
        Ok(recovered)
    }
}
