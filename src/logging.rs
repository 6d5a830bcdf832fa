//! Logging initialization
//!
//! Structured logging through `tracing-subscriber`. Stdout carries the
//! JSON-RPC channel, so every log line goes to stderr, and optionally to an
//! append-mode file as well.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter, writer::MakeWriterExt},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Build the writer: stderr, teed into the log file when one is configured
fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter> {
    match (&config.log_file, config.log_to_file) {
        (Some(path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            Ok(BoxMakeWriter::new(
                std::io::stderr.and(Mutex::new(file)),
            ))
        }
        _ => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

/// Install the global subscriber
///
/// `level` is the default directive; `RUST_LOG` still takes precedence.
///
/// # Errors
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init(config: &LoggingConfig, level: tracing::Level) -> Result<()> {
    let format: LogFormat = config
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let layer = fmt::layer()
        .with_writer(make_writer(config)?)
        .with_ansi(!config.log_to_file)
        .with_target(true);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!("Logging initialized: level={}, format={:?}", level, format);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }

    #[test]
    fn test_file_writer_creates_log_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("execbox.log");
        let config = LoggingConfig {
            log_to_file: true,
            log_file: Some(path.display().to_string()),
            ..Default::default()
        };

        make_writer(&config).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_file_writer_reports_unopenable_path() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            log_to_file: true,
            log_file: Some(dir.path().join("missing/dir/x.log").display().to_string()),
            ..Default::default()
        };

        assert!(make_writer(&config).is_err());
    }

    #[test]
    fn test_log_file_ignored_unless_enabled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unused.log");
        let config = LoggingConfig {
            log_to_file: false,
            log_file: Some(path.display().to_string()),
            ..Default::default()
        };

        make_writer(&config).unwrap();
        assert!(!path.exists());
    }
}
