// Configuration File Support
//
// Server settings for ExecBox: logging, where the security policy lives and
// which interpreter to launch. TOML format with environment variable overrides.
// Settings are loaded from the XDG config directory: ~/.config/execbox/config.toml
//
// The security policy itself is a separate JSON document (see `policy`).

use crate::tools::{Interpreter, DEFAULT_EXECUTION_POLICY};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the policy document inside the config directory
pub const POLICY_FILE_NAME: &str = "security_config.json";

/// Execution policies the interpreter accepts
const EXECUTION_POLICIES: &[&str] = &[
    "Restricted",
    "AllSigned",
    "RemoteSigned",
    "Bypass",
    "Undefined",
    "Unrestricted",
];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Policy document location and reload behaviour
    pub policy: PolicyConfig,

    /// Interpreter invocation
    pub interpreter: InterpreterConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Whether to also log to a file
    pub log_to_file: bool,

    /// Log file path (if log_to_file is true)
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_to_file: false,
            log_file: None,
        }
    }
}

/// Policy document configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy document path (defaults to the config directory)
    pub path: Option<PathBuf>,

    /// Seconds between checks for a changed document; 0 disables live reload
    pub reload_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: None,
            reload_interval_secs: 5,
        }
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Interpreter executable
    pub program: String,

    /// Value passed to `-ExecutionPolicy`
    pub execution_policy: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        let interpreter = Interpreter::default();
        Self {
            program: interpreter.program,
            execution_policy: DEFAULT_EXECUTION_POLICY.to_string(),
        }
    }
}

impl InterpreterConfig {
    pub fn interpreter(&self) -> Interpreter {
        Interpreter::new(&self.program, &self.execution_policy)
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
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
    /// Environment overrides are applied whether or not the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration does not validate.
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

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "execbox", "execbox")
    }

    fn config_dir() -> PathBuf {
        if let Some(proj_dirs) = Self::project_dirs() {
            proj_dirs.config_dir().to_path_buf()
        } else {
            // Fallback if XDG dirs cannot be determined
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("execbox")
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/execbox/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Policy document path, falling back to the config directory
    pub fn policy_path(&self) -> PathBuf {
        self.policy
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join(POLICY_FILE_NAME))
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - EXECBOX_LOG_LEVEL
    /// - EXECBOX_LOG_FORMAT
    /// - EXECBOX_POLICY_PATH
    /// - EXECBOX_RELOAD_INTERVAL_SECS
    /// - EXECBOX_INTERPRETER
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = lookup("EXECBOX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("EXECBOX_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(path) = lookup("EXECBOX_POLICY_PATH") {
            if !path.is_empty() {
                self.policy.path = Some(PathBuf::from(path));
            }
        }
        if let Some(interval) = lookup("EXECBOX_RELOAD_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.policy.reload_interval_secs = interval;
            }
        }

        if let Some(program) = lookup("EXECBOX_INTERPRETER") {
            if !program.is_empty() {
                self.interpreter.program = program;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.logging.log_to_file && self.logging.log_file.is_none() {
            anyhow::bail!("log_to_file is enabled but no log_file is configured");
        }

        if self.interpreter.program.trim().is_empty() {
            anyhow::bail!("Interpreter program must not be empty");
        }

        if !EXECUTION_POLICIES
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&self.interpreter.execution_policy))
        {
            anyhow::bail!(
                "Invalid execution policy: {}. Must be one of: {}",
                self.interpreter.execution_policy,
                EXECUTION_POLICIES.join(", ")
            );
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
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.policy.reload_interval_secs, 5);
        assert_eq!(config.interpreter.execution_policy, "Restricted");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_log_file_required() {
        let mut config = Config::default();
        config.logging.log_to_file = true;
        assert!(config.validate().is_err());

        config.logging.log_file = Some("/tmp/execbox.log".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_program() {
        let mut config = Config::default();
        config.interpreter.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_execution_policy() {
        let mut config = Config::default();
        config.interpreter.execution_policy = "remotesigned".to_string();
        assert!(config.validate().is_ok());

        config.interpreter.execution_policy = "Lenient".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid execution policy"));
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(
            config,
            Config::default().apply_env_overrides(),
        );
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[policy]
path = "/etc/execbox/policy.json"
reload_interval_secs = 0

[interpreter]
program = "/opt/microsoft/powershell/7/pwsh"
execution_policy = "AllSigned"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.policy_path(), PathBuf::from("/etc/execbox/policy.json"));
        assert_eq!(config.policy.reload_interval_secs, 0);
        assert_eq!(
            config.interpreter.interpreter(),
            Interpreter::new("/opt/microsoft/powershell/7/pwsh", "AllSigned")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_partial_toml() {
        let config: Config = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.policy, PolicyConfig::default());
        assert_eq!(config.interpreter, InterpreterConfig::default());
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[logging\nlevel = \"debug\"\n").unwrap();

        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(
            temp_file.path(),
            "[interpreter]\nexecution_policy = \"Whatever\"\n",
        )
        .unwrap();

        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("EXECBOX_LOG_LEVEL", "debug"),
            ("EXECBOX_LOG_FORMAT", "json"),
            ("EXECBOX_POLICY_PATH", "/srv/policy.json"),
            ("EXECBOX_RELOAD_INTERVAL_SECS", "30"),
            ("EXECBOX_INTERPRETER", "pwsh-preview"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.policy_path(), PathBuf::from("/srv/policy.json"));
        assert_eq!(config.policy.reload_interval_secs, 30);
        assert_eq!(config.interpreter.program, "pwsh-preview");
    }

    #[test]
    fn test_overrides_ignore_unparsable_values() {
        let config = Config::default().apply_overrides_from(|key| match key {
            "EXECBOX_RELOAD_INTERVAL_SECS" => Some("soon".to_string()),
            "EXECBOX_INTERPRETER" | "EXECBOX_POLICY_PATH" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_no_overrides_is_identity() {
        assert_eq!(
            Config::default().apply_overrides_from(no_env),
            Config::default()
        );
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
        assert!(Config::default().policy_path().ends_with(POLICY_FILE_NAME));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "DEBUG".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }
}
