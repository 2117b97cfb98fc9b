//! nser: tool execution and streaming engine
//!
//! Runs external security tools (nmap, subfinder, sqlmap, ...) against
//! operator-supplied targets, streams their output live to subscribers and
//! keeps a per-workspace history of every run.
//!
//! The [`Nser`] facade wires the pieces together:
//! - [`tools`]: registry, health checks, privilege probe
//! - [`storage`]: SQLite-backed workspaces, runs and documentation
//! - [`engine`]: process supervision and the event bus
//! - [`api`]: HTTP and server-sent events

pub mod api;
pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod storage;
pub mod tools;

pub use app::Nser;
pub use config::Config;
pub use engine::{Engine, EventBus, RunEvent, RunSubscription, StartedRun};
pub use error::{NserError, Result};
pub use storage::{CommandRun, NewWorkspace, RunStatus, Workspace};
pub use tools::{ToolCategory, ToolDefinition, ToolRegistry};
