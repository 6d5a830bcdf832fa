//! Command Validation
//!
//! Checks run cheapest first and stop at the first failure:
//!
//! 1. Length: raw character count against `max_command_length`
//! 2. Blocked patterns: first configured regex matching anywhere
//! 3. Allow-list: first whitespace-delimited token, case-insensitive
//!
//! Blocked patterns are evaluated before the allow-list, so an allowed
//! command that matches a blocked pattern is reported as blocked.

use super::SecurityPolicy;

/// Reason reported for an accepted command
pub const ALLOWED_REASON: &str = "Command is allowed";

/// Why a command was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("Command exceeds maximum length of {limit} characters")]
    TooLong { limit: usize, length: usize },

    #[error("Command contains blocked pattern: {pattern}")]
    BlockedPattern { pattern: String },

    #[error("Command '{command}' is not in the allowed commands list")]
    NotAllowed { command: String },
}

/// Result of command validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Command may run
    Allowed,

    /// Command must not run
    Rejected(PolicyViolation),
}

impl ValidationResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Human-readable reason, for both outcomes
    pub fn reason(&self) -> String {
        match self {
            Self::Allowed => ALLOWED_REASON.to_string(),
            Self::Rejected(violation) => violation.to_string(),
        }
    }

    pub fn violation(&self) -> Option<&PolicyViolation> {
        match self {
            Self::Allowed => None,
            Self::Rejected(violation) => Some(violation),
        }
    }
}

/// First whitespace-delimited token of a command, or `""` if there is none
pub fn primary_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

impl SecurityPolicy {
    /// Decide whether a command string may run
    ///
    /// Pure: never touches the filesystem and never spawns anything.
    ///
    /// # Example
    ///
    /// ```
    /// use execbox::policy::{PolicyViolation, SecurityPolicy, ValidationResult};
    ///
    /// let policy = SecurityPolicy::builtin().unwrap();
    /// assert!(policy.validate_command("  get-date  ").is_allowed());
    /// assert!(matches!(
    ///     policy.validate_command("Get-Date; Get-Host"),
    ///     ValidationResult::Rejected(PolicyViolation::BlockedPattern { .. })
    /// ));
    /// ```
    pub fn validate_command(&self, command: &str) -> ValidationResult {
        let length = command.chars().count();
        if length > self.document.max_command_length {
            return ValidationResult::Rejected(PolicyViolation::TooLong {
                limit: self.document.max_command_length,
                length,
            });
        }

        // SetMatches iterates in ascending index order, i.e. configured order
        if let Some(index) = self.blocked.matches(command).iter().next() {
            return ValidationResult::Rejected(PolicyViolation::BlockedPattern {
                pattern: self.document.blocked_patterns[index].clone(),
            });
        }

        let primary = primary_token(command);
        if !self.allowed_commands.contains(&primary.to_lowercase()) {
            return ValidationResult::Rejected(PolicyViolation::NotAllowed {
                command: primary.to_string(),
            });
        }

        ValidationResult::Allowed
    }
}
