//! Service facade
//!
//! [`Nser`] owns the database, registry, event bus and engine, and exposes
//! the operations the presentation layers (HTTP and CLI) consume.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::engine::{Engine, EventBus, RunSubscription, StartedRun};
use crate::error::{NserError, Result};
use crate::storage::{
    CommandRun, Database, DocStore, NewWorkspace, RunStore, ToolDocs, Workspace, WorkspaceStore,
};
use crate::tools::{
    current_privilege, HealthChecker, PrivilegeInfo, ProbeTimeout, ToolDefinition, ToolHealth,
    ToolRegistry,
};

/// Shared handle to the whole service; cheap to clone
#[derive(Debug, Clone)]
pub struct Nser {
    config: Arc<Config>,
    registry: Arc<ToolRegistry>,
    workspaces: WorkspaceStore,
    docs: DocStore,
    engine: Engine,
}

impl Nser {
    /// Open the configured database and recover runs left behind by a crash
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let path = config.storage.database_path.clone();
        let db = Database::open(&path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        let app = Self::with_database(config, db)?;

        app.engine.runs().recover_interrupted().await?;
        info!(
            "nser ready: {} tools, database {}",
            app.registry.len(),
            path
        );
        Ok(app)
    }

    /// Service backed by a private in-memory database
    pub fn open_in_memory(config: Config) -> anyhow::Result<Self> {
        let db = Database::open_in_memory()?;
        Self::with_database(config, db)
    }

    fn with_database(config: Config, db: Database) -> anyhow::Result<Self> {
        let registry =
            Arc::new(ToolRegistry::from_config(&config.tools).context("Invalid tool definitions")?);
        let bus = EventBus::new(config.engine.event_buffer);
        let engine = Engine::new(
            Arc::clone(&registry),
            RunStore::new(db.clone()),
            bus,
            config.engine.clone(),
        );
        Ok(Self {
            config: Arc::new(config),
            registry,
            workspaces: WorkspaceStore::new(db.clone()),
            docs: DocStore::new(db),
            engine,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // Workspaces

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.workspaces.list().await
    }

    pub async fn create_workspace(&self, input: NewWorkspace) -> Result<Workspace> {
        let workspace = self.workspaces.create(input).await?;
        info!(workspace_id = workspace.id, "Created workspace {}", workspace.name);
        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: i64) -> Result<Workspace> {
        self.workspaces.get(id).await
    }

    pub async fn update_workspace(&self, id: i64, input: NewWorkspace) -> Result<Workspace> {
        self.workspaces.update(id, input).await
    }

    /// Delete a workspace with its runs and output
    ///
    /// # Errors
    ///
    /// `RunActive` with the first live run id while any of its runs is
    /// still executing; nothing is deleted in that case.
    pub async fn delete_workspace(&self, id: i64) -> Result<()> {
        let guard = self.engine.lock_workspace(id).await;
        if let Some(run_id) = self.engine.active_run_in_workspace(id) {
            return Err(NserError::RunActive(run_id));
        }
        self.workspaces.get(id).await?;
        let removed = self.engine.runs().delete_by_workspace(id).await?;
        self.workspaces.delete(id).await?;
        self.engine.forget_workspace(id);
        drop(guard);
        info!(workspace_id = id, runs = removed, "Deleted workspace");
        Ok(())
    }

    // Tools

    pub fn list_tools(&self) -> &[ToolDefinition] {
        self.registry.list()
    }

    pub async fn tool_health(&self) -> Vec<ToolHealth> {
        let checker = HealthChecker::new(ProbeTimeout::from_millis(
            self.config.health.version_timeout_ms,
        ));
        checker.check_all(&self.registry).await
    }

    /// Documentation and examples for a registered tool
    pub async fn documentation(&self, tool: &str) -> Result<ToolDocs> {
        if self.registry.lookup(tool).is_none() {
            return Err(NserError::UnknownTool(tool.to_string()));
        }
        self.docs.documentation(tool).await
    }

    pub fn privilege(&self) -> PrivilegeInfo {
        current_privilege()
    }

    // Runs

    pub async fn start_run(
        &self,
        workspace_id: i64,
        tool: &str,
        target: &str,
        args: &[String],
    ) -> Result<StartedRun> {
        self.engine.start_run(workspace_id, tool, target, args).await
    }

    pub async fn start_run_attached(
        &self,
        workspace_id: i64,
        tool: &str,
        target: &str,
        args: &[String],
    ) -> Result<(StartedRun, RunSubscription)> {
        self.engine
            .start_run_attached(workspace_id, tool, target, args)
            .await
    }

    pub async fn cancel_run(&self, run_id: i64) -> Result<()> {
        self.engine.cancel_run(run_id).await
    }

    pub async fn get_run(&self, run_id: i64) -> Result<CommandRun> {
        self.engine.get_run(run_id).await
    }

    pub async fn run_history(&self, workspace_id: i64) -> Result<Vec<CommandRun>> {
        self.engine.list_history(workspace_id).await
    }

    pub async fn run_output(&self, run_id: i64) -> Result<String> {
        self.engine.get_output(run_id).await
    }

    pub async fn delete_run(&self, run_id: i64) -> Result<()> {
        self.engine.delete_run(run_id).await
    }

    pub fn subscribe(&self, run_id: i64) -> RunSubscription {
        self.engine.subscribe(run_id)
    }

    pub fn subscribe_all(&self) -> RunSubscription {
        self.engine.subscribe_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use crate::tools::ToolCategory;

    fn tool(category: ToolCategory, binary: &str, default_args: &[&str]) -> ToolConfig {
        ToolConfig {
            category,
            binary: binary.to_string(),
            default_args: default_args.iter().map(|a| a.to_string()).collect(),
            needs_root: false,
            version_flag: String::new(),
            description: String::new(),
            install_hint: Default::default(),
        }
    }

    fn app() -> Nser {
        Nser::open_in_memory(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_builtin_tools_and_docs() {
        let app = app();
        assert_eq!(app.list_tools().len(), 13);
        let docs = app.documentation("nmap").await.unwrap();
        assert!(!docs.documentation.is_empty());
        assert!(matches!(
            app.documentation("doesnotexist").await,
            Err(NserError::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_tools_are_appended() {
        let mut config = Config::default();
        config.tools.insert(
            "rustscan".to_string(),
            tool(ToolCategory::Scanning, "rustscan", &[]),
        );
        let app = Nser::open_in_memory(config).unwrap();
        assert_eq!(app.list_tools().len(), 14);
        assert_eq!(app.list_tools()[13].name, "rustscan");
    }

    #[tokio::test]
    async fn test_duplicate_configured_tool_fails_open() {
        let mut config = Config::default();
        config.tools.insert(
            "nmap".to_string(),
            tool(ToolCategory::Scanning, "nmap", &[]),
        );
        assert!(Nser::open_in_memory(config).is_err());
    }

    #[tokio::test]
    async fn test_workspace_lifecycle() {
        let app = app();
        let ws = app
            .create_workspace(NewWorkspace {
                name: "acme".to_string(),
                description: "external".to_string(),
                target: "acme.test".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(app.get_workspace(ws.id).await.unwrap().name, "acme");
        assert_eq!(app.list_workspaces().await.unwrap().len(), 1);

        app.delete_workspace(ws.id).await.unwrap();
        assert!(matches!(
            app.get_workspace(ws.id).await,
            Err(NserError::WorkspaceNotFound(_))
        ));
        assert!(matches!(
            app.delete_workspace(ws.id).await,
            Err(NserError::WorkspaceNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_workspace_with_active_run() {
        let mut config = Config::default();
        config.tools.insert(
            "sleeper".to_string(),
            tool(ToolCategory::Recon, "/bin/sh", &["-c", "exec sleep 30"]),
        );
        let app = Nser::open_in_memory(config).unwrap();
        let ws = app.create_workspace(NewWorkspace::named("busy")).await.unwrap();

        let (started, mut sub) = app
            .start_run_attached(ws.id, "sleeper", "t", &[])
            .await
            .unwrap();
        assert!(matches!(
            app.delete_workspace(ws.id).await,
            Err(NserError::RunActive(id)) if id == started.run_id
        ));

        app.cancel_run(started.run_id).await.unwrap();
        while sub.recv().await.is_some() {}

        app.delete_workspace(ws.id).await.unwrap();
        assert!(matches!(
            app.get_run(started.run_id).await,
            Err(NserError::RunNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_and_delete_workspace_agree() {
        let mut config = Config::default();
        config.tools.insert(
            "sleeper".to_string(),
            tool(ToolCategory::Recon, "/bin/sh", &["-c", "exec sleep 30"]),
        );
        let app = Nser::open_in_memory(config).unwrap();

        for i in 0..50 {
            let ws = app
                .create_workspace(NewWorkspace::named(format!("race-{}", i)))
                .await
                .unwrap();

            let starter = {
                let app = app.clone();
                tokio::spawn(async move { app.start_run(ws.id, "sleeper", "t", &[]).await })
            };
            let deleter = {
                let app = app.clone();
                tokio::spawn(async move { app.delete_workspace(ws.id).await })
            };
            let started = starter.await.unwrap();
            let deleted = deleter.await.unwrap();

            match (started, deleted) {
                (Ok(run), Err(NserError::RunActive(id))) => {
                    assert_eq!(id, run.run_id);
                    assert!(app.get_run(run.run_id).await.is_ok());
                    app.cancel_run(run.run_id).await.unwrap();
                }
                (Err(NserError::WorkspaceNotFound(_)), Ok(())) => {}
                other => panic!("start and delete both took effect: {:?}", other),
            }
        }

        // Every live run still has its row
        for run_id in app.engine().active_runs() {
            assert!(app.get_run(run_id).await.is_ok());
        }
    }
}
