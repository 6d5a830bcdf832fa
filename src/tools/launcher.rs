//! Process Launching
//!
//! The interpreter is always started with the same hardened argument shape:
//!
//! ```text
//! <program> -NoProfile -NonInteractive -ExecutionPolicy <policy> -Command <command>
//! ```
//!
//! The command string is passed as a single argument and is never re-parsed
//! by an OS shell. `ProcessLauncher` is the seam the executor spawns through;
//! tests substitute a mock that records launches without creating processes.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// Executable extension search list forced into the child environment
pub const SAFE_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD;.VBS;.VBE;.JS;.JSE;.WSF;.WSH;.MSC";

/// Default interpreter script execution policy
pub const DEFAULT_EXECUTION_POLICY: &str = "Restricted";

/// Interpreter executable plus its execution policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub execution_policy: String,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self {
            program: default_program().to_string(),
            execution_policy: DEFAULT_EXECUTION_POLICY.to_string(),
        }
    }
}

#[cfg(windows)]
fn default_program() -> &'static str {
    "powershell.exe"
}

#[cfg(not(windows))]
fn default_program() -> &'static str {
    "pwsh"
}

impl Interpreter {
    pub fn new(program: impl Into<String>, execution_policy: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            execution_policy: execution_policy.into(),
        }
    }

    /// Build the invocation for one validated command
    pub fn invocation(&self, command: &str, working_directory: Option<PathBuf>) -> Invocation {
        Invocation {
            program: self.program.clone(),
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-ExecutionPolicy".to_string(),
                self.execution_policy.clone(),
                "-Command".to_string(),
                command.to_string(),
            ],
            env: vec![("PATHEXT".to_string(), SAFE_PATHEXT.to_string())],
            working_directory,
        }
    }
}

/// Fully resolved process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Overrides applied on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// `None` inherits the server's current directory
    pub working_directory: Option<PathBuf>,
}

/// Raw output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Starts processes for the executor
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the invocation
    ///
    /// An error here is a launch failure: no process is running afterwards.
    fn launch(&self, invocation: &Invocation) -> io::Result<Box<dyn RunningProcess>>;
}

/// Handle to a spawned process
#[async_trait]
pub trait RunningProcess: Send {
    /// Wait for exit while draining both pipes
    async fn wait_with_output(&mut self) -> io::Result<ProcessOutput>;

    /// Forcibly stop the process and everything it started
    async fn terminate(&mut self) -> io::Result<()>;
}

/// Launcher backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, invocation: &Invocation) -> io::Result<Box<dyn RunningProcess>> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &invocation.working_directory {
            command.current_dir(dir);
        }

        isolate_process_group(&mut command);

        let child = command.spawn()?;
        let pid = child.id();
        debug!(pid = ?pid, program = %invocation.program, "Spawned interpreter");

        Ok(Box::new(TokioProcess { child, pid }))
    }
}

#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

struct TokioProcess {
    child: Child,

    /// Pid at spawn; also the process group id on unix. Kept because
    /// `Child::id` is gone once the leader is reaped, while its
    /// descendants may still be running.
    pid: Option<u32>,
}

#[async_trait]
impl RunningProcess for TokioProcess {
    async fn wait_with_output(&mut self) -> io::Result<ProcessOutput> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let (status, stdout, stderr) =
            tokio::try_join!(self.child.wait(), read_pipe(stdout), read_pipe(stderr))?;

        Ok(ProcessOutput {
            exit_code: exit_code(status),
            stdout,
            stderr,
        })
    }

    async fn terminate(&mut self) -> io::Result<()> {
        if let Some(pid) = self.pid {
            kill_process_tree(pid).await?;
        }

        match self.child.kill().await {
            // Already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Exit code, or the negated signal number for a signal-terminated process
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// SIGKILL the child's process group
#[cfg(unix)]
async fn kill_process_tree(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// `taskkill /T /F` the child and its descendants
#[cfg(windows)]
async fn kill_process_tree(pid: u32) -> io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        debug!(pid, "taskkill exited with {}", status);
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
async fn kill_process_tree(_pid: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_shape() {
        let interpreter = Interpreter::new("pwsh", "Restricted");
        let invocation = interpreter.invocation("Get-Date -Format o", None);

        assert_eq!(invocation.program, "pwsh");
        assert_eq!(
            invocation.args,
            [
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Restricted",
                "-Command",
                "Get-Date -Format o"
            ]
        );
        assert_eq!(
            invocation.env,
            [("PATHEXT".to_string(), SAFE_PATHEXT.to_string())]
        );
        assert_eq!(invocation.working_directory, None);
    }

    #[test]
    fn test_command_is_a_single_argument() {
        let invocation = Interpreter::default().invocation("Write-Output 'a b  c'", None);
        assert_eq!(invocation.args.last().unwrap(), "Write-Output 'a b  c'");
        assert_eq!(invocation.args.len(), 6);
    }

    #[test]
    fn test_default_interpreter() {
        let interpreter = Interpreter::default();
        assert_eq!(interpreter.execution_policy, "Restricted");
        #[cfg(windows)]
        assert_eq!(interpreter.program, "powershell.exe");
        #[cfg(not(windows))]
        assert_eq!(interpreter.program, "pwsh");
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Invocation {
        Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec![("PATHEXT".to_string(), SAFE_PATHEXT.to_string())],
            working_directory: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_launcher_captures_output() {
        let mut process = TokioLauncher
            .launch(&sh("echo out; echo err >&2; exit 3"))
            .unwrap();
        let output = process.wait_with_output().await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_launcher_sets_pathext_and_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut invocation = sh("echo \"$PATHEXT\"; pwd");
        invocation.working_directory = Some(dir.path().to_path_buf());

        let output = TokioLauncher
            .launch(&invocation)
            .unwrap()
            .wait_with_output()
            .await
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();

        assert_eq!(lines.next(), Some(SAFE_PATHEXT));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tokio_launcher_stdin_is_closed() {
        let output = TokioLauncher
            .launch(&sh("cat; echo done"))
            .unwrap()
            .wait_with_output()
            .await
            .unwrap();
        assert_eq!(output.stdout, b"done\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let invocation = Interpreter::new("execbox-no-such-interpreter-12345", "Restricted")
            .invocation("Get-Date", None);
        let result = TokioLauncher.launch(&invocation).map(|_| ());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_process_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", marker.display());

        let mut process = TokioLauncher.launch(&sh(&script)).unwrap();
        let mut grandchild = None;
        for _ in 0..100 {
            if let Ok(pid) = std::fs::read_to_string(&marker) {
                if let Ok(pid) = pid.trim().parse::<i32>() {
                    grandchild = Some(pid);
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let grandchild = grandchild.expect("grandchild pid");

        process.terminate().await.unwrap();
        // A second terminate on a reaped child is harmless
        process.terminate().await.unwrap();

        let mut gone = false;
        for _ in 0..100 {
            let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(grandchild), None).is_ok();
            if !alive || is_zombie(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(gone, "grandchild {} survived termination", grandchild);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_after_timeout_kills_orphaned_descendants() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("grandchild.pid");
        // The leader exits at once; the background sleep keeps stdout open
        let script = format!("sleep 30 & echo $! > {}; exit 0", marker.display());

        let mut process = TokioLauncher.launch(&sh(&script)).unwrap();
        let outcome = crate::tools::ExecutionTimeout::new(std::time::Duration::from_millis(500))
            .run(process.wait_with_output())
            .await;
        assert!(outcome.is_err(), "wait should time out while the pipe is held");

        let grandchild: i32 = std::fs::read_to_string(&marker)
            .unwrap()
            .trim()
            .parse()
            .unwrap();

        process.terminate().await.unwrap();

        let mut gone = false;
        for _ in 0..100 {
            let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(grandchild), None).is_ok();
            if !alive || is_zombie(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(gone, "descendant {} outlived its exited leader", grandchild);
    }

    #[cfg(unix)]
    fn is_zombie(pid: i32) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .map(|stat| stat.split_whitespace().nth(2) == Some("Z"))
            .unwrap_or(false)
    }
}
