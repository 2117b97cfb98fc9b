// Configuration File Support
//
// This module provides configuration file parsing for nser.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the platform config directory: ~/.config/nser/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::tools::ToolCategory;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Database location
    pub storage: StorageConfig,

    /// Execution engine tuning
    pub engine: EngineConfig,

    /// Tool health probing
    pub health: HealthConfig,

    /// HTTP API server
    pub server: ServerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Additional tool definitions, appended after the built-in catalog
    pub tools: BTreeMap<String, ToolConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Append logs to this file instead of stderr
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_file: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path().to_string_lossy().into_owned(),
        }
    }
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the per-run channel between the pipe reader and the run task
    pub output_channel_capacity: usize,

    /// Per-topic broadcast capacity; slower subscribers skip ahead
    pub event_buffer: usize,

    /// Grace period between SIGTERM and kill when a run is cancelled
    pub cancel_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_channel_capacity: 1024,
            event_buffer: 1024,
            cancel_grace_ms: 3000,
        }
    }
}

/// Health checker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Upper bound for a single `--version` probe
    pub version_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            version_timeout_ms: 5000,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to expose /metrics on the API server
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A tool definition supplied through the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    /// Lifecycle phase
    pub category: ToolCategory,

    /// Executable looked up on PATH
    pub binary: String,

    /// Arguments always placed before the target
    #[serde(default)]
    pub default_args: Vec<String>,

    /// Whether the tool needs root for its usual modes
    #[serde(default)]
    pub needs_root: bool,

    /// Flag that prints the version, empty to skip probing
    #[serde(default)]
    pub version_flag: String,

    /// One-line summary
    #[serde(default)]
    pub description: String,

    /// Install command per OS (`linux`, `macos`, `windows`)
    #[serde(default)]
    pub install_hint: HashMap<String, String>,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["json", "pretty", "compact"];

fn default_database_path() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        dir.join("nser").join("nser.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".nser").join("nser.db")
    }
}

impl Config {
    /// Load configuration from the default config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Missing file means defaults (still subject to env overrides).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    ///
    /// Returns `~/.config/nser/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(dir) = dirs::config_dir() {
            dir.join("nser").join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("nser").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - NSER_LOG_LEVEL
    /// - NSER_LOG_FORMAT
    /// - NSER_DB_PATH
    /// - NSER_HOST
    /// - NSER_PORT
    /// - NSER_HEALTH_TIMEOUT_MS
    /// - NSER_METRICS_ENABLED
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("NSER_LOG_LEVEL") {
            if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                self.logging.level = level;
            }
        }
        if let Ok(format) = std::env::var("NSER_LOG_FORMAT") {
            if LOG_FORMATS.contains(&format.to_lowercase().as_str()) {
                self.logging.format = format;
            }
        }

        if let Ok(path) = std::env::var("NSER_DB_PATH") {
            if !path.trim().is_empty() {
                self.storage.database_path = path;
            }
        }

        if let Ok(host) = std::env::var("NSER_HOST") {
            if !host.trim().is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("NSER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                if port > 0 {
                    self.server.port = port;
                }
            }
        }

        if let Ok(timeout) = std::env::var("NSER_HEALTH_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.health.version_timeout_ms = timeout;
                }
            }
        }

        if let Ok(enabled) = std::env::var("NSER_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        if !LOG_FORMATS.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log format: {}. Must be one of: {}",
                self.logging.format,
                LOG_FORMATS.join(", ")
            );
        }

        if self.storage.database_path.trim().is_empty() {
            anyhow::bail!("Database path must not be empty");
        }

        if self.engine.output_channel_capacity == 0 {
            anyhow::bail!("Engine output channel capacity must be > 0");
        }
        if self.engine.event_buffer == 0 {
            anyhow::bail!("Engine event buffer must be > 0");
        }

        if self.health.version_timeout_ms == 0 {
            anyhow::bail!("Health version timeout must be > 0");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        for (name, tool) in &self.tools {
            if name.trim().is_empty() {
                anyhow::bail!("Tool name must not be empty");
            }
            if tool.binary.trim().is_empty() {
                anyhow::bail!("Tool '{}' has empty binary", name);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Env vars are process-wide; tests touching them run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "NSER_LOG_LEVEL",
            "NSER_LOG_FORMAT",
            "NSER_DB_PATH",
            "NSER_HOST",
            "NSER_PORT",
            "NSER_HEALTH_TIMEOUT_MS",
            "NSER_METRICS_ENABLED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.output_channel_capacity, 1024);
        assert_eq!(config.health.version_timeout_ms, 5000);
        assert_eq!(config.server.port, 7878);
        assert!(config.metrics.enabled);
        assert!(config.tools.is_empty());
        assert!(config.storage.database_path.ends_with("nser.db"));
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_capacities() {
        let mut config = Config::default();
        config.engine.output_channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.event_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.version_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_tool_without_binary() {
        let mut config = Config::default();
        config.tools.insert(
            "custom".to_string(),
            ToolConfig {
                category: ToolCategory::Recon,
                binary: " ".to_string(),
                default_args: vec![],
                needs_root: false,
                version_flag: String::new(),
                description: String::new(),
                install_hint: HashMap::new(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[storage]
database_path = "/tmp/nser-test.db"

[engine]
output_channel_capacity = 64
cancel_grace_ms = 500

[health]
version_timeout_ms = 1500

[server]
port = 9000

[tools.rustscan]
category = "scanning"
binary = "rustscan"
default_args = ["--accessible"]
version_flag = "--version"
description = "Fast port scanner"
install_hint = { linux = "cargo install rustscan" }
"#;

        fs::write(temp_file.path(), toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.storage.database_path, "/tmp/nser-test.db");
        assert_eq!(config.engine.output_channel_capacity, 64);
        assert_eq!(config.engine.event_buffer, 1024);
        assert_eq!(config.engine.cancel_grace_ms, 500);
        assert_eq!(config.health.version_timeout_ms, 1500);
        assert_eq!(config.server.port, 9000);

        let tool = config.tools.get("rustscan").unwrap();
        assert_eq!(tool.category, ToolCategory::Scanning);
        assert_eq!(tool.default_args, vec!["--accessible".to_string()]);
        assert_eq!(tool.install_hint.get("linux").unwrap(), "cargo install rustscan");
    }

    #[test]
    fn test_invalid_tool_category_rejected_at_load() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[tools.weird]
category = "persistence"
binary = "weird"
"#;
        fs::write(temp_file.path(), toml_content).unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[logging\nlevel = \"debug\"\n").unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("NSER_LOG_LEVEL", "debug");
        std::env::set_var("NSER_DB_PATH", "/custom/nser.db");
        std::env::set_var("NSER_PORT", "8181");
        std::env::set_var("NSER_HEALTH_TIMEOUT_MS", "250");
        std::env::set_var("NSER_METRICS_ENABLED", "false");

        let config = Config::default().apply_env_overrides();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.database_path, "/custom/nser.db");
        assert_eq!(config.server.port, 8181);
        assert_eq!(config.health.version_timeout_ms, 250);
        assert!(!config.metrics.enabled);

        clear_env();
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("NSER_PORT", "not-a-port");
        std::env::set_var("NSER_HEALTH_TIMEOUT_MS", "0");
        std::env::set_var("NSER_LOG_LEVEL", "loud");

        let config = Config::default().apply_env_overrides();
        assert_eq!(config.logging.level, "info");

        assert_eq!(config.server.port, 7878);
        assert_eq!(config.health.version_timeout_ms, 5000);

        clear_env();
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "WARN".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::WARN);

        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }
}
