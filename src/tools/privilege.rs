//! Privilege Probe
//!
//! Reports who nser is running as and whether that identity is elevated.
//! Never fails: an unresolvable username comes back as an empty string.

use serde::Serialize;

/// Current process identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivilegeInfo {
    /// Effective uid 0 on Unix, administrator on Windows
    pub elevated: bool,
    pub username: String,
    /// `linux`, `macos`, `windows`, ...
    pub os: String,
}

/// Probe the current process privileges
pub fn current_privilege() -> PrivilegeInfo {
    PrivilegeInfo {
        elevated: is_elevated(),
        username: current_username(),
        os: std::env::consts::OS.to_string(),
    }
}

#[cfg(unix)]
fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(unix)]
fn current_username() -> String {
    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => user.name,
        Ok(None) | Err(_) => std::env::var("USER").unwrap_or_default(),
    }
}

// `net session` only succeeds from an elevated prompt.
#[cfg(windows)]
fn is_elevated() -> bool {
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn current_username() -> String {
    std::env::var("USERNAME").unwrap_or_default()
}

#[cfg(not(any(unix, windows)))]
fn is_elevated() -> bool {
    false
}

#[cfg(not(any(unix, windows)))]
fn current_username() -> String {
    String::new()
}
