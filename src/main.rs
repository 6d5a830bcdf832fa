// ExecBox - Main Entry Point
//
// Runs the policy-gated PowerShell gateway:
// - MCP server on stdio (default)
// - One-shot validation and execution from the shell
// - Policy document inspection and initialization

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use execbox::config::Config;
use execbox::mcp::{stdio, CommandCheck, McpServer};
use execbox::policy::{save_document, spawn_reload_watcher, PolicyDocument, PolicyStore};
use execbox::tools::BoundedExecutor;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// ExecBox: policy-gated PowerShell execution over MCP
#[derive(Parser, Debug)]
#[command(name = "execbox")]
#[command(version)]
#[command(about = "Policy-gated PowerShell command execution over MCP", long_about = None)]
struct Args {
    /// Security policy document (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server settings file (TOML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve MCP requests on stdin/stdout
    Serve,
    /// Check a command against the policy without running it
    Validate {
        /// Command to check
        command: String,
    },
    /// Validate and run a single command
    Exec {
        /// Command to run
        command: String,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Print the effective policy document
    ShowPolicy,
    /// Write the default policy document
    InitPolicy {
        /// Overwrite an existing document
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = match &args.settings {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
        config.validate()?;
    }
    if let Some(path) = &args.config {
        config.policy.path = Some(path.clone());
    }

    let level = if args.verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    execbox::logging::init(&config.logging, level)?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await,
        Commands::Validate { command } => validate(&config, &command),
        Commands::Exec { command, cwd } => exec(&config, &command, cwd.as_deref()).await,
        Commands::ShowPolicy => show_policy(&config),
        Commands::InitPolicy { force } => init_policy(&config, force),
    }
}

fn open_store(config: &Config) -> Result<Arc<PolicyStore>> {
    let path = config.policy_path();
    let store = PolicyStore::open(&path)
        .with_context(|| format!("Failed to open security policy at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Run the stdio server until the client disconnects
async fn serve(config: &Config) -> Result<ExitCode> {
    let store = open_store(config)?;
    let executor = BoundedExecutor::with_interpreter(config.interpreter.interpreter());

    info!(
        "ExecBox v{} starting (interpreter: {})",
        env!("CARGO_PKG_VERSION"),
        executor.interpreter().program
    );

    let watcher = match config.policy.reload_interval_secs {
        0 => None,
        secs => Some(spawn_reload_watcher(
            store.clone(),
            Duration::from_secs(secs),
        )),
    };

    let (reader, writer) = stdio();
    let result = Arc::new(McpServer::new(store, executor))
        .serve(reader, writer)
        .await;

    if let Some(watcher) = watcher {
        watcher.abort();
    }

    result.map(|()| ExitCode::SUCCESS)
}

fn validate(config: &Config, command: &str) -> Result<ExitCode> {
    let policy = open_store(config)?.snapshot();
    let check = CommandCheck::evaluate(&policy, command);
    print_json(&check)?;

    Ok(if check.is_allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn exec(config: &Config, command: &str, cwd: Option<&str>) -> Result<ExitCode> {
    let policy = open_store(config)?.snapshot();
    let executor = BoundedExecutor::with_interpreter(config.interpreter.interpreter());

    let result = executor.run(&policy, command, cwd).await;
    print_json(&result)?;

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn show_policy(config: &Config) -> Result<ExitCode> {
    let store = open_store(config)?;
    let policy = store.snapshot();

    print_json(&json!({
        "path": store.path().map(|p| p.display().to_string()),
        "policy": policy.document(),
        "summary": policy.summary(),
    }))?;

    Ok(ExitCode::SUCCESS)
}

fn init_policy(config: &Config, force: bool) -> Result<ExitCode> {
    let path = config.policy_path();
    if path.exists() && !force {
        anyhow::bail!(
            "Policy document already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    save_document(&path, &PolicyDocument::default())
        .with_context(|| format!("Failed to write policy document to {}", path.display()))?;
    println!("Wrote default policy to {}", path.display());

    Ok(ExitCode::SUCCESS)
}
