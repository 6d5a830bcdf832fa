//! Bounded Execution Subsystem
//!
//! Runs policy-cleared commands through the interpreter.
//!
//! # Security Features
//!
//! - **Policy First**: a command is validated before anything is spawned
//! - **Single Argument**: the command is passed to the interpreter's
//!   `-Command` switch as one argument, never through an OS shell
//! - **Hardened Invocation**: no profile, non-interactive, restricted script
//!   execution policy, fixed `PATHEXT`, closed stdin
//! - **Timeout Enforcement**: the whole process tree is killed when the
//!   policy's budget runs out
//!
//! # Architecture
//!
//! - `executor.rs`: validation order and result shaping
//! - `launcher.rs`: interpreter invocation and the process seam
//! - `timeout.rs`: wall-clock budget
//! - `result.rs`: `ExecutionResult` and the error kinds

mod executor;
mod launcher;
mod result;
mod timeout;

pub use executor::BoundedExecutor;
pub use launcher::{
    Interpreter, Invocation, ProcessLauncher, ProcessOutput, RunningProcess, TokioLauncher,
    DEFAULT_EXECUTION_POLICY, SAFE_PATHEXT,
};
pub use result::{ExecutionError, ExecutionResult};
pub use timeout::{Elapsed, ExecutionTimeout};
