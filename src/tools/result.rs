//! Execution result types

use crate::policy::PolicyViolation;
use serde::{Deserialize, Serialize};

/// Why a request ended without a completed process
///
/// The `Display` text is what callers see in `ExecutionResult::error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Command blocked: {0}")]
    Blocked(PolicyViolation),

    #[error("Directory does not exist: {0}")]
    DirectoryMissing(String),

    #[error("Directory not allowed: {0}")]
    DirectoryNotAllowed(String),

    #[error("Command timed out after {0} seconds")]
    TimedOut(u64),

    #[error("Execution error: {0}")]
    Launch(String),
}

/// Outcome of one execution request
///
/// `error` is present only when no process completed. A process that ran
/// and exited nonzero has `success == false`, a `return_code` and no
/// `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub command: String,

    #[serde(default)]
    pub working_directory: Option<String>,
}

impl ExecutionResult {
    /// Result for a process that ran to completion
    ///
    /// Streams are trimmed here.
    pub fn completed(
        command: &str,
        working_directory: Option<&str>,
        return_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Self {
        Self {
            success: return_code == 0,
            return_code: Some(return_code),
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            error: None,
            command: command.to_string(),
            working_directory: working_directory.map(str::to_string),
        }
    }

    /// Result for a request that never produced a completed process
    pub fn failed(command: &str, working_directory: Option<&str>, error: &ExecutionError) -> Self {
        Self {
            success: false,
            return_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.to_string()),
            command: command.to_string(),
            working_directory: working_directory.map(str::to_string),
        }
    }

    /// True when the request was blocked, timed out or failed to launch
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match (&self.error, self.return_code) {
            (Some(error), _) => error.clone(),
            (None, Some(code)) if self.success => format!(
                "Success (exit code: {}, {} bytes output)",
                code,
                self.stdout.len()
            ),
            (None, code) => format!(
                "Failed (exit code: {:?}, {} bytes output)",
                code,
                self.stdout.len() + self.stderr.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let blocked = ExecutionError::Blocked(PolicyViolation::BlockedPattern {
            pattern: "Remove-Item".to_string(),
        });
        assert_eq!(
            blocked.to_string(),
            "Command blocked: Command contains blocked pattern: Remove-Item"
        );
        assert_eq!(
            ExecutionError::DirectoryMissing("/nope".to_string()).to_string(),
            "Directory does not exist: /nope"
        );
        assert_eq!(
            ExecutionError::DirectoryNotAllowed("/etc".to_string()).to_string(),
            "Directory not allowed: /etc"
        );
        assert_eq!(
            ExecutionError::TimedOut(30).to_string(),
            "Command timed out after 30 seconds"
        );
        assert_eq!(
            ExecutionError::Launch("No such file or directory".to_string()).to_string(),
            "Execution error: No such file or directory"
        );
    }

    #[test]
    fn test_completed_trims_streams() {
        let result = ExecutionResult::completed("Get-Date", None, 0, "  out\r\n", "\n");
        assert!(result.success);
        assert_eq!(result.return_code, Some(0));
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "");
        assert!(!result.is_error());
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let result = ExecutionResult::completed("Get-Item x", Some("/tmp"), 1, "", "not found");
        assert!(!result.success);
        assert!(!result.is_error());
        assert_eq!(result.working_directory.as_deref(), Some("/tmp"));
        assert!(result.summary().contains("Failed"));
    }

    #[test]
    fn test_failed_has_empty_streams() {
        let result = ExecutionResult::failed("Get-Date", None, &ExecutionError::TimedOut(5));
        assert!(!result.success);
        assert!(result.is_error());
        assert_eq!(result.return_code, None);
        assert!(result.stdout.is_empty() && result.stderr.is_empty());
        assert_eq!(result.summary(), "Command timed out after 5 seconds");
    }

    #[test]
    fn test_serialized_shape() {
        let ok = serde_json::to_value(ExecutionResult::completed("Get-Date", None, 0, "d", ""))
            .unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["return_code"], 0);
        assert_eq!(ok["working_directory"], serde_json::Value::Null);
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(ExecutionResult::failed(
            "x",
            Some("/tmp"),
            &ExecutionError::Launch("boom".to_string()),
        ))
        .unwrap();
        assert_eq!(failed["error"], "Execution error: boom");
        assert!(failed.get("return_code").is_none());
        assert_eq!(failed["working_directory"], "/tmp");
    }
}
