//! Health Checker
//!
//! On-demand probe of every registered tool: is the binary on PATH, where,
//! and what version does it report. Probes are isolated per tool; a missing
//! or hung binary only affects its own entry.

use futures::future::join_all;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use super::registry::{ToolCategory, ToolDefinition, ToolRegistry};
use super::timeout::ProbeTimeout;
use crate::engine::{process, CommandSpec};
use crate::metrics;

// Version output is a few lines at most
const PROBE_CHANNEL_CAPACITY: usize = 64;

/// Availability of one tool, recomputed on every check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolHealth {
    pub name: String,
    pub category: ToolCategory,
    pub installed: bool,
    /// First non-empty line of the version probe, empty if unknown
    pub version: String,
    /// Resolved executable path, empty if not installed
    pub path: String,
    pub needs_root: bool,
    pub install_hint: String,
}

/// Probes tool binaries with a bounded version check
#[derive(Debug, Clone, Default)]
pub struct HealthChecker {
    timeout: ProbeTimeout,
}

impl HealthChecker {
    pub fn new(timeout: ProbeTimeout) -> Self {
        Self { timeout }
    }

    /// Check every tool, returning entries in registry order
    pub async fn check_all(&self, registry: &ToolRegistry) -> Vec<ToolHealth> {
        let started = Instant::now();
        let results = join_all(registry.list().iter().map(|def| self.check(def))).await;
        metrics::HEALTH_PROBE_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        results
    }

    /// Check a single tool
    pub async fn check(&self, def: &ToolDefinition) -> ToolHealth {
        let mut health = ToolHealth {
            name: def.name.clone(),
            category: def.category,
            installed: false,
            version: String::new(),
            path: String::new(),
            needs_root: def.needs_root,
            install_hint: def.install_hint_for_current_os().to_string(),
        };

        let path = match which::which(&def.binary) {
            Ok(path) => path,
            Err(e) => {
                debug!("Tool {} not found on PATH: {}", def.name, e);
                return health;
            }
        };

        health.installed = true;
        health.path = path.to_string_lossy().into_owned();

        if !def.version_flag.is_empty() {
            health.version = self.probe_version(&def.name, &path, &def.version_flag).await;
        }

        health
    }

    /// First non-empty line the version flag prints, stdout and stderr
    /// taken in the order they were written
    async fn probe_version(&self, name: &str, path: &Path, flag: &str) -> String {
        let spec = CommandSpec {
            program: path.to_string_lossy().into_owned(),
            args: vec![flag.to_string()],
        };
        let mut probe = match process::spawn(&spec, PROBE_CHANNEL_CAPACITY) {
            Ok(probe) => probe,
            Err(e) => {
                debug!("Version probe for {} failed: {}", name, e);
                return String::new();
            }
        };

        // Some tools exit non-zero for their version flag but still print it
        let read = async {
            let mut version = String::new();
            while let Some(line) = probe.lines.recv().await {
                if version.is_empty() {
                    version = first_non_empty_line(&line);
                }
            }
            if let Err(e) = probe.child.wait().await {
                debug!("Version probe for {} was not reaped: {}", name, e);
            }
            version
        };

        match self.timeout.run(read).await {
            Some(version) => version,
            None => {
                warn!(
                    "Version probe for {} timed out after {:?}",
                    name,
                    self.timeout.duration()
                );
                if let Err(e) = process::kill(&mut probe.child, probe.group) {
                    debug!("Failed to kill version probe for {}: {}", name, e);
                }
                String::new()
            }
        }
    }
}

/// First line with non-whitespace content, trimmed
pub fn first_non_empty_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_non_empty_line() {
        assert_eq!(first_non_empty_line("\n  \nNmap version 7.94\nmore"), "Nmap version 7.94");
        assert_eq!(first_non_empty_line("v2.6.3\r\n"), "v2.6.3");
        assert_eq!(first_non_empty_line(""), "");
        assert_eq!(first_non_empty_line("\n\n   \n"), "");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_installed() {
        let def = ToolDefinition::new("ghost", ToolCategory::Recon, "nser-definitely-missing-binary")
            .version_flag("--version")
            .install_hints("apt install ghost", "brew install ghost", "choco install ghost");
        let health = HealthChecker::default().check(&def).await;

        assert!(!health.installed);
        assert!(health.path.is_empty());
        assert!(health.version.is_empty());
        if std::env::consts::OS == "linux" {
            assert_eq!(health.install_hint, "apt install ghost");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_probe_reads_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("version.sh");
        std::fs::write(&script, "echo\necho '  faketool v1.2.3  '\necho 'extra'\n").unwrap();

        let def = ToolDefinition::new("faketool", ToolCategory::Scanning, "/bin/sh")
            .version_flag(script.to_string_lossy());
        let health = HealthChecker::default().check(&def).await;

        assert!(health.installed);
        assert!(health.path.ends_with("sh"));
        assert_eq!(health.version, "faketool v1.2.3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_from_stderr_and_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("version.sh");
        std::fs::write(&script, "echo 'oldtool 0.9' >&2\nexit 2\n").unwrap();

        let def = ToolDefinition::new("oldtool", ToolCategory::Scanning, "/bin/sh")
            .version_flag(script.to_string_lossy());
        let health = HealthChecker::default().check(&def).await;

        assert!(health.installed);
        assert_eq!(health.version, "oldtool 0.9");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_is_first_line_written_across_streams() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("version.sh");
        std::fs::write(
            &script,
            "echo 'banner: config loaded' >&2\nsleep 0.1\necho 'tool v3.1.0'\n",
        )
        .unwrap();

        let def = ToolDefinition::new("bannered", ToolCategory::Scanning, "/bin/sh")
            .version_flag(script.to_string_lossy());
        let health = HealthChecker::default().check(&def).await;

        assert!(health.installed);
        assert_eq!(health.version, "banner: config loaded");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_probe_times_out_without_failing_batch() {
        let dir = tempfile::tempdir().unwrap();
        let hang = dir.path().join("hang.sh");
        std::fs::write(&hang, "exec sleep 30\n").unwrap();
        let quick = dir.path().join("quick.sh");
        std::fs::write(&quick, "echo quick 1.0\n").unwrap();

        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDefinition::new("hung", ToolCategory::Recon, "/bin/sh")
                    .version_flag(hang.to_string_lossy()),
            )
            .unwrap();
        registry
            .register(ToolDefinition::new("missing", ToolCategory::Recon, "nser-missing-tool"))
            .unwrap();
        registry
            .register(
                ToolDefinition::new("quick", ToolCategory::Recon, "/bin/sh")
                    .version_flag(quick.to_string_lossy()),
            )
            .unwrap();

        let checker = HealthChecker::new(ProbeTimeout::new(Duration::from_millis(1500)));
        let started = Instant::now();
        let results = checker.check_all(&registry).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        let names: Vec<&str> = results.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["hung", "missing", "quick"]);

        assert!(results[0].installed);
        assert_eq!(results[0].version, "");
        assert!(!results[1].installed);
        assert_eq!(results[2].version, "quick 1.0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_version_flag_skips_probe() {
        let def = ToolDefinition::new("shell", ToolCategory::Recon, "/bin/sh");
        let health = HealthChecker::default().check(&def).await;
        assert!(health.installed);
        assert!(health.version.is_empty());
    }
}
