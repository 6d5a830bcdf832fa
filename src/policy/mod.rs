//! Security Policy Engine
//!
//! This module holds the active security policy and answers the two questions
//! every execution request must clear before a process is started:
//!
//! - "may this command string run?" (`SecurityPolicy::validate_command`)
//! - "may this directory be used as a working directory?"
//!   (`SecurityPolicy::validate_directory`)
//!
//! # Architecture
//!
//! - `PolicyDocument`: the persisted, editable form (flat JSON object)
//! - `SecurityPolicy`: the compiled, immutable form used for evaluation
//! - `validator.rs`: command checks (length, blocked patterns, allow-list)
//! - `directory.rs`: directory confinement (prefix and wildcard rules)
//! - `store.rs`: loading, first-run materialization and atomic reloads
//!
//! Decisions are made by pattern matching over the raw command string. The
//! engine never parses the interpreter's grammar.

mod directory;
mod store;
mod validator;

pub use directory::normalize_path;
pub use store::{load_document, save_document, spawn_reload_watcher, PolicyStore};
pub use validator::{primary_token, PolicyViolation, ValidationResult, ALLOWED_REASON};

use directory::DirectoryRule;
use regex::{RegexBuilder, RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default maximum command length in characters
pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 200;

/// Default wall-clock budget for a spawned process
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Compiled size limit for a single blocked pattern (1MB)
const PATTERN_SIZE_LIMIT: usize = 1024 * 1024;

/// Error types for policy loading and compilation
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Could not read policy document {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse policy document {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not write policy document {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not serialize policy document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid blocked pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid allowed directory '{entry}': {source}")]
    InvalidDirectory {
        entry: String,
        #[source]
        source: regex::Error,
    },

    #[error("timeout_seconds must be at least 1, got {0}")]
    InvalidTimeout(u64),
}

/// Persisted policy document
///
/// Every key is optional in the file: absent keys fall back to the built-in
/// defaults (shallow merge, key by key).
///
/// # Example
///
/// ```json
/// {
///   "allowed_commands": ["Get-Date", "Get-ChildItem"],
///   "allowed_directories": ["C:\\temp", "C:\\Users\\*\\Documents"],
///   "blocked_patterns": ["[;&|`]", "Remove-Item"],
///   "max_command_length": 200,
///   "timeout_seconds": 30
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyDocument {
    /// Command names allowed as the first token (case-insensitive)
    pub allowed_commands: Vec<String>,

    /// Allowed working directory prefixes; entries may contain `*`
    pub allowed_directories: Vec<String>,

    /// Regular expressions rejected anywhere in the command (case-insensitive)
    pub blocked_patterns: Vec<String>,

    /// Maximum command length in characters (inclusive)
    pub max_command_length: usize,

    /// Wall-clock budget for the spawned process
    pub timeout_seconds: u64,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            allowed_commands: [
                "Get-ChildItem",
                "Get-Item",
                "Get-Content",
                "Get-Location",
                "Set-Location",
                "Test-Path",
                "Get-Process",
                "Get-Service",
                "Get-Date",
                "Get-Host",
                "Write-Output",
                "Write-Host",
                "Select-Object",
                "Where-Object",
                "Sort-Object",
                "Measure-Object",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_directories: default_allowed_directories(),
            blocked_patterns: [
                r"[;&|`]", // Command separators and pipes
                r"Invoke-Expression",
                r"Invoke-Command",
                r"Invoke-WebRequest",
                r"Invoke-RestMethod",
                r"iex\s",
                r"icm\s",
                r"Start-Process",
                r"sps\s",
                r"Remove-Item",
                r"rm\s",
                r"del\s",
                r"rmdir\s",
                r"\.ps1", // Script files
                r"\.bat", // Batch files
                r"\.cmd", // Command files
                r"\.exe", // Executables
                r"powershell\.exe",
                r"cmd\.exe",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_command_length: DEFAULT_MAX_COMMAND_LENGTH,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[cfg(windows)]
fn default_allowed_directories() -> Vec<String> {
    vec![
        "C:\\Users\\Public".to_string(),
        "C:\\temp".to_string(),
        "C:\\Windows\\System32".to_string(),
    ]
}

#[cfg(not(windows))]
fn default_allowed_directories() -> Vec<String> {
    vec!["/tmp".to_string(), "/var/tmp".to_string()]
}

impl PolicyDocument {
    /// Parse a document, filling absent keys from the defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize as pretty-printed JSON (2-space indentation)
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Compile the document into an evaluable policy
    ///
    /// # Errors
    ///
    /// Returns an error if a blocked pattern or wildcard directory does not
    /// compile, or if `timeout_seconds` is zero.
    pub fn compile(self) -> Result<SecurityPolicy, PolicyError> {
        SecurityPolicy::compile(self)
    }
}

/// Compiled security policy
///
/// Immutable once built. Concurrent callers share it through an `Arc`
/// obtained from `PolicyStore::snapshot`, so a single request always sees one
/// complete policy.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    document: PolicyDocument,

    /// Lowercased allow-list
    allowed_commands: HashSet<String>,

    /// Blocked patterns, index-aligned with `document.blocked_patterns`
    blocked: RegexSet,

    /// Directory rules, in configured order
    directory_rules: Vec<DirectoryRule>,
}

impl SecurityPolicy {
    /// Compile the built-in default policy
    pub fn builtin() -> Result<Self, PolicyError> {
        Self::compile(PolicyDocument::default())
    }

    /// Compile a policy from its document form
    pub fn compile(document: PolicyDocument) -> Result<Self, PolicyError> {
        if document.timeout_seconds == 0 {
            return Err(PolicyError::InvalidTimeout(document.timeout_seconds));
        }

        // Compile each pattern individually first so a bad one can be named
        for pattern in &document.blocked_patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .size_limit(PATTERN_SIZE_LIMIT)
                .build()
                .map_err(|source| PolicyError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
        }

        let blocked = RegexSetBuilder::new(&document.blocked_patterns)
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT * document.blocked_patterns.len().max(1))
            .build()
            .map_err(|source| PolicyError::InvalidPattern {
                pattern: document.blocked_patterns.join(", "),
                source,
            })?;

        let directory_rules = document
            .allowed_directories
            .iter()
            .map(|entry| {
                DirectoryRule::parse(entry).map_err(|source| PolicyError::InvalidDirectory {
                    entry: entry.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let allowed_commands = document
            .allowed_commands
            .iter()
            .map(|c| c.to_lowercase())
            .collect();

        Ok(Self {
            document,
            allowed_commands,
            blocked,
            directory_rules,
        })
    }

    /// The document this policy was compiled from
    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Allowed command names, as configured
    pub fn allowed_commands(&self) -> &[String] {
        &self.document.allowed_commands
    }

    /// Allowed directory entries, as configured
    pub fn allowed_directories(&self) -> &[String] {
        &self.document.allowed_directories
    }

    /// Blocked patterns, as configured
    pub fn blocked_patterns(&self) -> &[String] {
        &self.document.blocked_patterns
    }

    pub fn max_command_length(&self) -> usize {
        self.document.max_command_length
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.document.timeout_seconds
    }

    /// Wall-clock budget for a spawned process
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.document.timeout_seconds)
    }

    /// Summary counts for the `get_security_config` query
    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            allowed_commands_count: self.document.allowed_commands.len(),
            allowed_directories_count: self.document.allowed_directories.len(),
            blocked_patterns_count: self.document.blocked_patterns.len(),
            max_command_length: self.document.max_command_length,
            timeout_seconds: self.document.timeout_seconds,
        }
    }
}

/// Policy summary counts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySummary {
    pub allowed_commands_count: usize,
    pub allowed_directories_count: usize,
    pub blocked_patterns_count: usize,
    pub max_command_length: usize,
    pub timeout_seconds: u64,
}
