//! Directory Confinement
//!
//! A working directory is allowed when its normalized absolute form falls
//! under at least one configured entry:
//!
//! - plain entries match as path prefixes, compared component by component,
//!   so an allowed `/tmp` admits `/tmp/a` but never `/tmpfoo`
//! - entries containing `*` are translated to an anchored, case-insensitive
//!   regex where `*` matches within a single path segment; the match must
//!   end on a segment boundary and admits everything below it
//!
//! Normalization is lexical. The directory does not need to exist and
//! symlinks are not resolved.

use super::SecurityPolicy;
use regex::{Regex, RegexBuilder};
use std::path::{Component, Path, PathBuf};

/// Compiled form of one `allowed_directories` entry
#[derive(Debug, Clone)]
pub(crate) enum DirectoryRule {
    /// Normalized absolute prefix
    Prefix(PathBuf),

    /// Anchored wildcard pattern
    Wildcard(Regex),
}

impl DirectoryRule {
    pub(crate) fn parse(entry: &str) -> Result<Self, regex::Error> {
        let normalized = normalize_path(Path::new(entry));
        if entry.contains('*') {
            Ok(Self::Wildcard(wildcard_regex(&normalized.to_string_lossy())?))
        } else {
            Ok(Self::Prefix(normalized))
        }
    }

    /// Check a normalized absolute candidate against this rule
    pub(crate) fn admits(&self, candidate: &Path) -> bool {
        match self {
            Self::Prefix(prefix) => path_starts_with(candidate, prefix),
            Self::Wildcard(pattern) => pattern.is_match(&candidate.to_string_lossy()),
        }
    }
}

/// Translate a wildcard entry into an anchored regex
///
/// `*` never crosses a separator. The trailing group lets the match stop at
/// any segment boundary, so descendants of a matching directory are admitted.
fn wildcard_regex(entry: &str) -> Result<Regex, regex::Error> {
    let trimmed = entry.trim_end_matches(['/', '\\']);
    let mut pattern = String::with_capacity(trimmed.len() * 2 + 16);
    pattern.push('^');
    for ch in trimmed.chars() {
        match ch {
            '*' => pattern.push_str(r"[^/\\]*"),
            '/' | '\\' => pattern.push_str(r"[/\\]"),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    pattern.push_str(r"(?:[/\\].*)?$");

    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

/// Normalize a path to an absolute form without touching the filesystem
///
/// Relative paths are resolved against the current directory; `.` segments
/// are dropped and `..` segments pop the previous segment (never above the
/// root).
///
/// # Example
///
/// ```
/// # #[cfg(unix)] {
/// use execbox::policy::normalize_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(normalize_path(Path::new("/tmp/./a/../b")), PathBuf::from("/tmp/b"));
/// assert_eq!(normalize_path(Path::new("/../..")), PathBuf::from("/"));
/// # }
/// ```
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }
    normalized
}

#[cfg(windows)]
fn path_starts_with(candidate: &Path, prefix: &Path) -> bool {
    let candidate = candidate.to_string_lossy().to_lowercase();
    let prefix = prefix.to_string_lossy().to_lowercase();
    Path::new(&candidate).starts_with(Path::new(&prefix))
}

#[cfg(not(windows))]
fn path_starts_with(candidate: &Path, prefix: &Path) -> bool {
    candidate.starts_with(prefix)
}

impl SecurityPolicy {
    /// Decide whether a directory may be used as a working directory
    ///
    /// Returns true on the first matching entry. Existence is not checked
    /// here; the executor reports a missing directory separately.
    pub fn validate_directory(&self, path: &str) -> bool {
        let candidate = normalize_path(Path::new(path));
        self.directory_rules
            .iter()
            .any(|rule| rule.admits(&candidate))
    }
}
