//! Bounded Executor
//!
//! Runs one policy-cleared command through the interpreter under the policy's
//! wall-clock budget. Every path returns an `ExecutionResult`; nothing is
//! propagated to the caller as an error.

use super::launcher::{Interpreter, ProcessLauncher, TokioLauncher};
use super::result::{ExecutionError, ExecutionResult};
use super::timeout::ExecutionTimeout;
use crate::policy::{SecurityPolicy, ValidationResult};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Policy-gated process executor
///
/// # Example
///
/// ```no_run
/// use execbox::policy::SecurityPolicy;
/// use execbox::tools::BoundedExecutor;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let policy = SecurityPolicy::builtin()?;
///     let executor = BoundedExecutor::new();
///
///     let result = executor.run(&policy, "Get-Date", None).await;
///     println!("{}", result.summary());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct BoundedExecutor {
    launcher: Arc<dyn ProcessLauncher>,
    interpreter: Interpreter,
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("interpreter", &self.interpreter)
            .finish_non_exhaustive()
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedExecutor {
    /// Executor using the default interpreter and real processes
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::default())
    }

    pub fn with_interpreter(interpreter: Interpreter) -> Self {
        Self::with_launcher(Arc::new(TokioLauncher), interpreter)
    }

    pub fn with_launcher(launcher: Arc<dyn ProcessLauncher>, interpreter: Interpreter) -> Self {
        Self {
            launcher,
            interpreter,
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Validate and run a command
    ///
    /// Order: command policy, directory existence, directory policy, launch,
    /// wait under the timeout. An empty `working_directory` counts as absent.
    pub async fn run(
        &self,
        policy: &SecurityPolicy,
        command: &str,
        working_directory: Option<&str>,
    ) -> ExecutionResult {
        let working_directory = working_directory.filter(|dir| !dir.is_empty());
        let span = tracing::info_span!(
            "execution",
            id = %uuid::Uuid::new_v4(),
            cwd = working_directory.unwrap_or("-")
        );

        self.run_checked(policy, command, working_directory)
            .instrument(span)
            .await
    }

    async fn run_checked(
        &self,
        policy: &SecurityPolicy,
        command: &str,
        working_directory: Option<&str>,
    ) -> ExecutionResult {
        let fail =
            |error: ExecutionError| ExecutionResult::failed(command, working_directory, &error);

        if let ValidationResult::Rejected(violation) = policy.validate_command(command) {
            warn!(command, "Command blocked: {}", violation);
            return fail(ExecutionError::Blocked(violation));
        }

        if let Some(dir) = working_directory {
            // A regular file at the path counts as missing
            if !Path::new(dir).is_dir() {
                warn!(dir, "Working directory does not exist");
                return fail(ExecutionError::DirectoryMissing(dir.to_string()));
            }
            if !policy.validate_directory(dir) {
                warn!(dir, "Working directory not allowed");
                return fail(ExecutionError::DirectoryNotAllowed(dir.to_string()));
            }
        }

        let invocation = self
            .interpreter
            .invocation(command, working_directory.map(Into::into));

        info!(command, "Executing");
        let mut process = match self.launcher.launch(&invocation) {
            Ok(process) => process,
            Err(e) => {
                error!(program = %invocation.program, "Failed to launch interpreter: {}", e);
                return fail(ExecutionError::Launch(e.to_string()));
            }
        };

        let timeout = ExecutionTimeout::for_policy(policy);
        let outcome = timeout.run(process.wait_with_output()).await;
        match outcome {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let result = ExecutionResult::completed(
                    command,
                    working_directory,
                    output.exit_code,
                    &stdout,
                    &stderr,
                );

                if result.success {
                    info!("{}", result.summary());
                } else {
                    warn!(stderr = %result.stderr, "{}", result.summary());
                }
                result
            }
            Ok(Err(e)) => {
                error!("Failed while waiting for interpreter: {}", e);
                if let Err(kill_err) = process.terminate().await {
                    debug!("Cleanup after wait failure: {}", kill_err);
                }
                fail(ExecutionError::Launch(e.to_string()))
            }
            Err(_) => {
                error!(command, "Command timed out after {:?}", timeout.duration());
                if let Err(e) = process.terminate().await {
                    warn!("Failed to terminate timed out process: {}", e);
                }
                fail(ExecutionError::TimedOut(timeout.whole_seconds()))
            }
        }
    }
}
