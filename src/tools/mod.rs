//! Tool Catalog and Host Probes
//!
//! Everything nser knows about the external tools it wraps, without
//! running them for the operator:
//!
//! - `registry.rs`: the read-only tool catalog and the closed category set
//! - `defs.rs`: built-in tool definitions
//! - `privilege.rs`: current user and elevation
//! - `health.rs`: installed / path / version probes
//! - `timeout.rs`: bounded waits for probe processes
//!
//! # Example
//!
//! ```no_run
//! use nser::tools::{HealthChecker, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ToolRegistry::with_builtins();
//!     for health in HealthChecker::default().check_all(&registry).await {
//!         println!("{} installed={} {}", health.name, health.installed, health.version);
//!     }
//! }
//! ```

mod defs;
mod health;
mod privilege;
mod registry;
mod timeout;

pub use health::{first_non_empty_line, HealthChecker, ToolHealth};
pub use privilege::{current_privilege, PrivilegeInfo};
pub use registry::{RegistryError, ToolCategory, ToolDefinition, ToolRegistry};
pub use timeout::ProbeTimeout;
