//! Tool Registry
//!
//! Read-only catalog of the external tools nser knows how to run. The
//! registry is built once at startup (built-ins first, then `[tools.*]`
//! entries from the config file) and shared behind an `Arc` afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::config::ToolConfig;

/// Assessment phase a tool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Recon,
    Scanning,
    Exploit,
}

impl ToolCategory {
    /// All categories in display order
    pub const ALL: [ToolCategory; 3] = [
        ToolCategory::Recon,
        ToolCategory::Scanning,
        ToolCategory::Exploit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Recon => "recon",
            ToolCategory::Scanning => "scanning",
            ToolCategory::Exploit => "exploit",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ToolCategory {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recon" => Ok(ToolCategory::Recon),
            "scanning" => Ok(ToolCategory::Scanning),
            "exploit" => Ok(ToolCategory::Exploit),
            other => Err(RegistryError::UnknownCategory(other.to_string())),
        }
    }
}

/// Errors raised while building the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two definitions share a name
    #[error("duplicate tool registration: {0}")]
    Duplicate(String),

    /// Definition has an empty name or binary
    #[error("invalid tool definition: {0}")]
    Invalid(String),

    /// Category string outside the closed set
    #[error("unknown tool category: {0}")]
    UnknownCategory(String),
}

/// Static description of one external tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique key, e.g. `nmap`
    pub name: String,
    pub category: ToolCategory,
    /// Executable name resolved on PATH at spawn time
    pub binary: String,
    /// Always placed before the target; callers can only append
    pub default_args: Vec<String>,
    pub needs_root: bool,
    /// Install command keyed by OS (`linux`, `macos`, `windows`)
    pub install_hint: BTreeMap<String, String>,
    /// Empty when the tool has no version flag
    pub version_flag: String,
    pub description: String,
}

impl ToolDefinition {
    /// Minimal definition; the remaining fields use the builder methods
    pub fn new(name: impl Into<String>, category: ToolCategory, binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            binary: binary.into(),
            default_args: Vec::new(),
            needs_root: false,
            install_hint: BTreeMap::new(),
            version_flag: String::new(),
            description: String::new(),
        }
    }

    pub fn default_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn needs_root(mut self, needs_root: bool) -> Self {
        self.needs_root = needs_root;
        self
    }

    pub fn version_flag(mut self, flag: impl Into<String>) -> Self {
        self.version_flag = flag.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set hints for linux, macos and windows in one call
    pub fn install_hints(mut self, linux: &str, macos: &str, windows: &str) -> Self {
        self.install_hint.insert("linux".to_string(), linux.to_string());
        self.install_hint.insert("macos".to_string(), macos.to_string());
        self.install_hint.insert("windows".to_string(), windows.to_string());
        self
    }

    /// Hint for the OS this process runs on, empty when none is known
    pub fn install_hint_for_current_os(&self) -> &str {
        self.install_hint
            .get(std::env::consts::OS)
            .map(String::as_str)
            .unwrap_or("")
    }

    fn from_config(name: &str, tool: &ToolConfig) -> Self {
        Self {
            name: name.to_string(),
            category: tool.category,
            binary: tool.binary.clone(),
            default_args: tool.default_args.clone(),
            needs_root: tool.needs_root,
            install_hint: tool
                .install_hint
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            version_flag: tool.version_flag.clone(),
            description: tool.description.clone(),
        }
    }
}

/// Ordered, name-indexed tool catalog
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the built-in catalog
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for def in super::defs::builtin_tools() {
            // Built-in names are unique
            if let Err(e) = registry.register(def) {
                tracing::error!("Skipping built-in tool: {}", e);
            }
        }
        registry
    }

    /// Built-ins followed by the configured tools, in name order
    pub fn from_config(tools: &BTreeMap<String, ToolConfig>) -> Result<Self, RegistryError> {
        let mut registry = Self::with_builtins();
        for (name, tool) in tools {
            registry.register(ToolDefinition::from_config(name, tool))?;
        }
        tracing::debug!("Tool registry loaded with {} tools", registry.len());
        Ok(registry)
    }

    /// Add a definition at the end of the catalog
    pub fn register(&mut self, def: ToolDefinition) -> Result<(), RegistryError> {
        if def.name.trim().is_empty() {
            return Err(RegistryError::Invalid("empty name".to_string()));
        }
        if def.binary.trim().is_empty() {
            return Err(RegistryError::Invalid(format!("{} has empty binary", def.name)));
        }
        if self.index.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.index.insert(def.name.clone(), self.tools.len());
        self.tools.push(def);
        Ok(())
    }

    /// All tools in registration order
    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Case-sensitive lookup by name
    pub fn lookup(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn by_category(&self, category: ToolCategory) -> Vec<&ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| t.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
