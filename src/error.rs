//! Error Types
//!
//! All fallible engine, registry and storage operations return [`NserError`].
//! Spawn failures are deliberately absent: a tool that cannot be launched is
//! recorded as a `failed` run, never returned to the caller of `start_run`.

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, NserError>;

/// Error types for workspace, run and tool operations
#[derive(Debug, thiserror::Error)]
pub enum NserError {
    /// Requested tool is not in the registry
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Run target is empty or whitespace
    #[error("target must not be empty")]
    InvalidTarget,

    /// No run with this id
    #[error("run not found: {0}")]
    RunNotFound(i64),

    /// No workspace with this id
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(i64),

    /// Operation not allowed while the run's process is alive
    #[error("run {0} is still active")]
    RunActive(i64),

    /// Cancel requested for a run that already finished
    #[error("run {0} is not active")]
    RunNotActive(i64),

    /// Workspace fields failed validation
    #[error("invalid workspace: {0}")]
    InvalidWorkspace(String),

    /// SQLite error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Blocking storage task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NserError {
    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            NserError::UnknownTool(_) => "unknown_tool",
            NserError::InvalidTarget => "invalid_target",
            NserError::RunNotFound(_) => "run_not_found",
            NserError::WorkspaceNotFound(_) => "workspace_not_found",
            NserError::RunActive(_) => "run_active",
            NserError::RunNotActive(_) => "run_not_active",
            NserError::InvalidWorkspace(_) => "invalid_workspace",
            NserError::Storage(_) => "storage",
            NserError::Task(_) => "task",
            NserError::Io(_) => "io",
        }
    }
}

impl From<tokio::task::JoinError> for NserError {
    fn from(err: tokio::task::JoinError) -> Self {
        NserError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            NserError::UnknownTool("doesnotexist".into()).to_string(),
            "unknown tool: doesnotexist"
        );
        assert_eq!(NserError::RunActive(7).to_string(), "run 7 is still active");
        assert_eq!(NserError::InvalidTarget.to_string(), "target must not be empty");
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = vec![
            NserError::UnknownTool(String::new()),
            NserError::InvalidTarget,
            NserError::RunNotFound(1),
            NserError::WorkspaceNotFound(1),
            NserError::RunActive(1),
            NserError::RunNotActive(1),
            NserError::InvalidWorkspace(String::new()),
            NserError::Task(String::new()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
