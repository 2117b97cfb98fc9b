// Workspace persistence
//
// Plain CRUD. Deleting a workspace cascades to its runs and their output
// through the foreign keys; the engine refuses first if any run is live.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_timestamp, Database};
use crate::error::{NserError, Result};

/// A named container for one engagement's runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Default target offered when starting runs
    pub target: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied when creating or updating a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewWorkspace {
    pub name: String,
    pub description: String,
    pub target: String,
}

impl NewWorkspace {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn validated(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(NserError::InvalidWorkspace("name must not be empty".to_string()));
        }
        self.target = self.target.trim().to_string();
        Ok(self)
    }
}

const COLUMNS: &str = "id, name, description, target, created_at, updated_at";

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        target: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Workspace table access
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    db: Database,
}

impl WorkspaceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: NewWorkspace) -> Result<Workspace> {
        let input = input.validated()?;
        self.db
            .call(move |conn| {
                let now = now_timestamp();
                conn.execute(
                    "INSERT INTO workspaces (name, description, target, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![input.name, input.description, input.target, now],
                )?;
                let id = conn.last_insert_rowid();
                Ok(Workspace {
                    id,
                    name: input.name,
                    description: input.description,
                    target: input.target,
                    created_at: now.clone(),
                    updated_at: now,
                })
            })
            .await
    }

    pub async fn get(&self, id: i64) -> Result<Workspace> {
        self.db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {COLUMNS} FROM workspaces WHERE id = ?1"),
                    params![id],
                    row_to_workspace,
                )
                .optional()?
                .ok_or(NserError::WorkspaceNotFound(id))
            })
            .await
    }

    pub async fn exists(&self, id: i64) -> Result<bool> {
        self.db
            .call(move |conn| {
                let found: Option<i64> = conn
                    .query_row("SELECT 1 FROM workspaces WHERE id = ?1", params![id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(found.is_some())
            })
            .await
    }

    /// Most recently updated first
    pub async fn list(&self) -> Result<Vec<Workspace>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM workspaces ORDER BY updated_at DESC, id DESC"
                ))?;
                let rows = stmt.query_map([], row_to_workspace)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    /// Replace name, description and target; bumps `updated_at`
    pub async fn update(&self, id: i64, input: NewWorkspace) -> Result<Workspace> {
        let input = input.validated()?;
        self.db
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE workspaces SET name = ?1, description = ?2, target = ?3, updated_at = ?4 \
                     WHERE id = ?5",
                    params![input.name, input.description, input.target, now_timestamp(), id],
                )?;
                if changed == 0 {
                    return Err(NserError::WorkspaceNotFound(id));
                }
                Ok(conn.query_row(
                    &format!("SELECT {COLUMNS} FROM workspaces WHERE id = ?1"),
                    params![id],
                    row_to_workspace,
                )?)
            })
            .await
    }

    /// Remove the workspace together with its runs and output
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.db
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM workspaces WHERE id = ?1", params![id])?;
                if changed == 0 {
                    return Err(NserError::WorkspaceNotFound(id));
                }
                Ok(())
            })
            .await
    }
}
