// End-to-end run behavior through the public library surface

use nser::config::{Config, EngineConfig};
use nser::engine::CommandSpec;
use nser::storage::{Database, NewRun, RunStore, WorkspaceStore, INTERRUPTED_MESSAGE};
use nser::{
    Engine, EventBus, NewWorkspace, Nser, NserError, RunEvent, RunStatus, RunSubscription,
    ToolCategory, ToolDefinition, ToolRegistry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

async fn engine_with(tools: Vec<ToolDefinition>) -> (Engine, i64) {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    let db = Database::open_in_memory().unwrap();
    let ws = WorkspaceStore::new(db.clone())
        .create(NewWorkspace::named("it"))
        .await
        .unwrap();
    let engine = Engine::new(
        Arc::new(registry),
        RunStore::new(db),
        EventBus::new(1024),
        EngineConfig::default(),
    );
    (engine, ws.id)
}

async fn collect(mut sub: RunSubscription) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.recv().await {
        events.push(event);
    }
    events
}

fn lines_of(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::OutputLine { line, .. } => Some(line.clone()),
            RunEvent::RunCompleted { .. } => None,
        })
        .collect()
}

#[test]
fn scenario_a_command_line() {
    let nmap =
        ToolDefinition::new("nmap", ToolCategory::Scanning, "nmap").default_args(["-sV"]);
    let spec = CommandSpec::build(&nmap, "10.0.0.5", &["-p".to_string(), "80,443".to_string()]);
    assert_eq!(spec.command_line(), "nmap -sV 10.0.0.5 -p 80,443");
}

#[tokio::test]
async fn scenario_b_unknown_tool_is_synchronous() {
    let app = Nser::open_in_memory(Config::default()).unwrap();
    let ws = app.create_workspace(NewWorkspace::named("b")).await.unwrap();

    let err = app.start_run(ws.id, "doesnotexist", "x", &[]).await.unwrap_err();
    assert!(matches!(err, NserError::UnknownTool(_)));
    assert!(app.run_history(ws.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_c_missing_binary_fails_quickly() {
    let (engine, ws) = engine_with(vec![ToolDefinition::new(
        "missing",
        ToolCategory::Scanning,
        "nser-tool-that-is-not-installed",
    )])
    .await;

    let (started, sub) = engine
        .start_run_attached(ws, "missing", "10.0.0.1", &[])
        .await
        .unwrap();
    let events = tokio::time::timeout(Duration::from_secs(5), collect(sub))
        .await
        .unwrap();
    assert!(events.last().unwrap().is_completion());

    let run = engine.get_run(started.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_ne!(run.exit_code, Some(0));
    let output = engine.get_output(started.run_id).await.unwrap();
    assert!(!output.trim().is_empty());
}

#[cfg(unix)]
fn sh_tool(name: &str, script: &str) -> ToolDefinition {
    ToolDefinition::new(name, ToolCategory::Recon, "/bin/sh").default_args(["-c", script])
}

#[cfg(unix)]
#[tokio::test]
async fn scenario_d_concurrent_runs_do_not_interleave() {
    let (engine, ws) = engine_with(vec![sh_tool(
        "counter",
        "i=0; while [ $i -lt 100 ]; do echo \"$0 $i\"; i=$((i+1)); done",
    )])
    .await;

    let (a, sub_a) = engine
        .start_run_attached(ws, "counter", "alpha", &[])
        .await
        .unwrap();
    let (b, sub_b) = engine
        .start_run_attached(ws, "counter", "beta", &[])
        .await
        .unwrap();
    assert_ne!(a.run_id, b.run_id);

    let (events_a, events_b) = tokio::join!(collect(sub_a), collect(sub_b));
    for (events, tag, run_id) in [(&events_a, "alpha", a.run_id), (&events_b, "beta", b.run_id)] {
        assert!(events.iter().all(|e| e.run_id() == run_id));
        let lines = lines_of(events);
        let expected: Vec<String> = (0..100).map(|i| format!("{} {}", tag, i)).collect();
        assert_eq!(lines, expected);
        assert_eq!(events.iter().filter(|e| e.is_completion()).count(), 1);
    }

    let output_a = engine.get_output(a.run_id).await.unwrap();
    assert!(!output_a.contains("beta"));
    assert_eq!(output_a, lines_of(&events_a).join("\n") + "\n");
}

#[cfg(unix)]
#[tokio::test]
async fn start_run_does_not_wait_for_the_tool() {
    let (engine, ws) = engine_with(vec![sh_tool("slow", "sleep 3; echo done")]).await;

    let begin = Instant::now();
    let started = engine.start_run(ws, "slow", "t", &[]).await.unwrap();
    assert!(begin.elapsed() < Duration::from_secs(2));

    let run = engine.get_run(started.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.exit_code, None);
    assert_eq!(engine.active_runs(), vec![started.run_id]);

    engine.cancel_run(started.run_id).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn output_is_readable_while_running() {
    let (engine, ws) = engine_with(vec![sh_tool("chatty", "echo first; sleep 30")]).await;

    let (started, mut sub) = engine
        .start_run_attached(ws, "chatty", "t", &[])
        .await
        .unwrap();
    assert!(sub.recv().await.is_some());
    assert_eq!(engine.get_output(started.run_id).await.unwrap(), "first\n");

    engine.cancel_run(started.run_id).await.unwrap();
    collect(sub).await;
    assert_eq!(
        engine.get_run(started.run_id).await.unwrap().status,
        RunStatus::Cancelled
    );
}

#[cfg(unix)]
#[tokio::test]
async fn delete_is_rejected_while_active_then_idempotent() {
    let (engine, ws) = engine_with(vec![sh_tool("sleeper", "exec sleep 30")]).await;

    let (started, sub) = engine
        .start_run_attached(ws, "sleeper", "t", &[])
        .await
        .unwrap();
    assert!(matches!(
        engine.delete_run(started.run_id).await,
        Err(NserError::RunActive(_))
    ));

    engine.cancel_run(started.run_id).await.unwrap();
    collect(sub).await;

    engine.delete_run(started.run_id).await.unwrap();
    assert!(matches!(
        engine.delete_run(started.run_id).await,
        Err(NserError::RunNotFound(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn firehose_sees_every_run() {
    let (engine, ws) = engine_with(vec![sh_tool("one", "echo $0")]).await;
    let mut all = engine.subscribe_all();

    let first = engine.start_run(ws, "one", "x", &[]).await.unwrap();
    let second = engine.start_run(ws, "one", "y", &[]).await.unwrap();

    let mut completed = Vec::new();
    while completed.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(10), all.recv())
            .await
            .unwrap()
            .unwrap();
        if event.is_completion() {
            completed.push(event.run_id());
        }
    }
    completed.sort_unstable();
    assert_eq!(completed, vec![first.run_id, second.run_id]);
}

#[tokio::test]
async fn reopening_recovers_interrupted_runs() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nser.db");

    let run_id = {
        let db = Database::open(&db_path).unwrap();
        let ws = WorkspaceStore::new(db.clone())
            .create(NewWorkspace::named("crashy"))
            .await
            .unwrap();
        let run = RunStore::new(db)
            .create(NewRun {
                workspace_id: ws.id,
                tool_name: "nmap".to_string(),
                target: "10.0.0.1".to_string(),
                args: vec![],
                command_line: "nmap 10.0.0.1".to_string(),
            })
            .await
            .unwrap();
        run.id
    };

    let mut config = Config::default();
    config.storage.database_path = db_path.to_string_lossy().into_owned();
    let app = Nser::open(config).await.unwrap();

    let run = app.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.exit_code, Some(-1));
    assert!(run.completed_at.is_some());
    assert!(app.run_output(run_id).await.unwrap().contains(INTERRUPTED_MESSAGE));
}
