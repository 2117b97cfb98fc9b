// nser - Main Entry Point
//
// Command-line front end over the library:
// - HTTP API server (`serve`)
// - Tool catalog, health and documentation
// - Workspace management
// - Foreground runs with live output

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nser::config::Config;
use nser::storage::NewWorkspace;
use nser::{logging, metrics, Nser, RunEvent};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

/// nser: run security tools and stream their output
#[derive(Parser, Debug)]
#[command(name = "nser")]
#[command(version)]
#[command(about = "Tool execution and streaming engine for security tooling", long_about = None)]
struct Args {
    /// Config file (default: <config dir>/nser/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List registered tools
    Tools,
    /// Check which tools are installed
    Health,
    /// Show the current user and whether it is elevated
    Whoami,
    /// Show documentation and examples for a tool
    Docs {
        /// Tool name
        tool: String,
    },
    /// Manage workspaces
    #[command(subcommand)]
    Workspace(WorkspaceCommand),
    /// Run a tool in the foreground, streaming its output
    Run {
        /// Workspace to record the run in
        #[arg(long, short)]
        workspace: i64,

        /// Tool name
        tool: String,

        /// Target host, domain or URL
        target: String,

        /// Extra arguments appended after the target
        #[arg(last = true)]
        extra: Vec<String>,
    },
    /// List the runs of a workspace, newest first
    History {
        /// Workspace id
        workspace: i64,
    },
    /// Print the captured output of a run
    Output {
        /// Run id
        run: i64,
    },
    /// Delete a finished run and its output
    DeleteRun {
        /// Run id
        run: i64,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    /// List workspaces
    List,
    /// Create a workspace
    Create {
        /// Workspace name
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Default target
        #[arg(long, default_value = "")]
        target: String,
    },
    /// Show one workspace
    Show {
        id: i64,
    },
    /// Delete a workspace with all of its runs
    Delete {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    logging::init(&config.logging, args.verbose)?;
    if config.metrics.enabled {
        metrics::init()?;
    }

    let app = Nser::open(config).await?;

    match args.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| app.config().server.host.clone());
            let port = port.unwrap_or(app.config().server.port);
            nser::api::serve(app, &host, port).await?;
        }
        Commands::Tools => print_tools(&app),
        Commands::Health => print_health(&app).await,
        Commands::Whoami => {
            let info = app.privilege();
            let role = if info.elevated { "elevated" } else { "standard" };
            println!("{} ({}, {})", info.username, role, info.os);
        }
        Commands::Docs { tool } => print_docs(&app, &tool).await?,
        Commands::Workspace(cmd) => workspace_command(&app, cmd).await?,
        Commands::Run {
            workspace,
            tool,
            target,
            extra,
        } => return run_foreground(&app, workspace, &tool, &target, &extra).await,
        Commands::History { workspace } => print_history(&app, workspace).await?,
        Commands::Output { run } => {
            print!("{}", app.run_output(run).await?);
        }
        Commands::DeleteRun { run } => {
            app.delete_run(run).await?;
            println!("Deleted run {}", run);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_tools(app: &Nser) {
    for tool in app.list_tools() {
        let root = if tool.needs_root { " (root)" } else { "" };
        println!(
            "{:<14} {:<9} {}{}",
            tool.name, tool.category, tool.description, root
        );
    }
}

async fn print_health(app: &Nser) {
    for health in app.tool_health().await {
        if health.installed {
            let version = if health.version.is_empty() {
                "version unknown"
            } else {
                health.version.as_str()
            };
            println!("✓ {:<14} {} ({})", health.name, version, health.path);
        } else if health.install_hint.is_empty() {
            println!("✗ {:<14} not installed", health.name);
        } else {
            println!(
                "✗ {:<14} not installed, try: {}",
                health.name, health.install_hint
            );
        }
    }
}

async fn print_docs(app: &Nser, tool: &str) -> Result<()> {
    let docs = app.documentation(tool).await?;
    if docs.documentation.is_empty() {
        println!("No documentation for {}", tool);
    } else {
        println!("{}", docs.documentation);
    }
    for example in docs.examples {
        println!();
        println!("# {}", example.title);
        if !example.description.is_empty() {
            println!("  {}", example.description);
        }
        println!("  $ {}", example.command);
    }
    Ok(())
}

async fn workspace_command(app: &Nser, cmd: WorkspaceCommand) -> Result<()> {
    match cmd {
        WorkspaceCommand::List => {
            for ws in app.list_workspaces().await? {
                println!("{:>4}  {:<20} {}", ws.id, ws.name, ws.target);
            }
        }
        WorkspaceCommand::Create {
            name,
            description,
            target,
        } => {
            let ws = app
                .create_workspace(NewWorkspace {
                    name,
                    description,
                    target,
                })
                .await?;
            println!("Created workspace {} ({})", ws.id, ws.name);
        }
        WorkspaceCommand::Show { id } => {
            let ws = app.get_workspace(id).await?;
            println!("{}", serde_json::to_string_pretty(&ws)?);
        }
        WorkspaceCommand::Delete { id } => {
            app.delete_workspace(id).await?;
            println!("Deleted workspace {}", id);
        }
    }
    Ok(())
}

async fn print_history(app: &Nser, workspace: i64) -> Result<()> {
    for run in app.run_history(workspace).await? {
        let exit = run
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<10} {:>4}  {}  {}",
            run.id, run.status, exit, run.started_at, run.command_line
        );
    }
    Ok(())
}

/// Stream a run to stdout; Ctrl-C cancels it. Exits with the tool's code.
async fn run_foreground(
    app: &Nser,
    workspace: i64,
    tool: &str,
    target: &str,
    extra: &[String],
) -> Result<ExitCode> {
    let (started, mut events) = app
        .start_run_attached(workspace, tool, target, extra)
        .await
        .context("Failed to start run")?;
    info!(run_id = started.run_id, "{}", started.command_line);

    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling run {}", started.run_id);
                if let Err(e) = app.cancel_run(started.run_id).await {
                    warn!("Failed to cancel run: {}", e);
                }
                continue;
            }
        };
        match event {
            Some(RunEvent::OutputLine { line, .. }) => println!("{}", line),
            Some(RunEvent::RunCompleted {
                status,
                exit_code,
                duration_ms,
                ..
            }) => {
                eprintln!(
                    "run {} {} (exit code {}, {} ms)",
                    started.run_id, status, exit_code, duration_ms
                );
                return Ok(ExitCode::from(process_exit_byte(exit_code)));
            }
            None => break,
        }
    }

    // Subscription ended without a completion event; report from the store
    let run = app.get_run(started.run_id).await?;
    Ok(ExitCode::from(process_exit_byte(
        run.exit_code.unwrap_or(1),
    )))
}

fn process_exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
