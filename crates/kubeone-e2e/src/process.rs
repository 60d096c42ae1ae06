//! Subprocess execution for the external `kubeone` and `sonobuoy` binaries.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::error::E2eError;
use crate::Result;

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    /// Executable path or name looked up in `PATH`.
    pub program: String,

    /// Arguments, not including the program.
    pub args: Vec<String>,

    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,

    /// Working directory (inherited when `None`).
    pub workdir: Option<PathBuf>,

    /// Kill the process after this long (`None` waits forever).
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-like rendering used in logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: Vec<u8>,

    /// Captured stderr.
    pub stderr: Vec<u8>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Turn a non-zero exit into [`E2eError::CommandFailed`].
    pub fn check(self, command: &ProcessCommand) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(E2eError::CommandFailed {
                command: command.display(),
                exit_code: self.exit_code,
                stdout: self.stdout_lossy(),
                stderr: self.stderr_lossy(),
            })
        }
    }
}

/// Capability to run external processes.
///
/// Verification logic only talks to this trait, so tests substitute
/// [`FakeProcessRunner`](crate::fakes::FakeProcessRunner) for real binaries.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command` to completion and capture its output.
    ///
    /// Only spawn failures and timeouts are errors; a non-zero exit is
    /// reported through [`ProcessOutput::exit_code`].
    async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput>;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn execute(&self, command: &ProcessCommand) -> Result<ProcessOutput> {
        if command.program.is_empty() {
            return Err(E2eError::Config("empty command".to_string()));
        }

        let start = Instant::now();
        debug!(command = %command.display(), "Spawning process");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.workdir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn()?;

        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| E2eError::Timeout {
                    elapsed: limit,
                    message: format!("command `{}` did not finish", command.display()),
                })??,
            None => child.wait_with_output().await?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            command = %command.display(),
            exit_code = exit_code,
            duration_ms = duration_ms,
            "Process finished"
        );

        Ok(ProcessOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = ProcessCommand::new("kubeone")
            .args(["config", "dump"])
            .arg("-m")
            .arg("kubeone.yaml");
        assert_eq!(cmd.display(), "kubeone config dump -m kubeone.yaml");
    }

    #[test]
    fn test_check_surfaces_output_verbatim() {
        let cmd = ProcessCommand::new("kubeone").arg("apply");
        let output = ProcessOutput {
            exit_code: 2,
            stdout: b"partial".to_vec(),
            stderr: b"ssh: connection refused".to_vec(),
            duration_ms: 5,
        };

        match output.check(&cmd) {
            Err(E2eError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
            }) => {
                assert_eq!(command, "kubeone apply");
                assert_eq!(exit_code, 2);
                assert_eq!(stdout, "partial");
                assert_eq!(stderr, "ssh: connection refused");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let cmd = ProcessCommand::new("echo").arg("hello");
        let output = TokioProcessRunner.execute(&cmd).await.expect("execute failed");
        assert!(output.success());
        assert!(output.stdout_lossy().contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let cmd = ProcessCommand::new("false");
        let output = TokioProcessRunner.execute(&cmd).await.expect("execute failed");
        assert!(!output.success());
        assert!(output.check(&cmd).is_err());
    }

    #[tokio::test]
    async fn test_execute_with_env_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ProcessCommand::new("sh")
            .args(["-c", "echo $K1_TEST_VAR; pwd"])
            .env("K1_TEST_VAR", "from-env")
            .current_dir(dir.path());
        let output = TokioProcessRunner.execute(&cmd).await.expect("execute failed");
        let stdout = output.stdout_lossy();
        assert!(stdout.contains("from-env"));
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(stdout.contains(&dir_name));
    }

    #[tokio::test]
    async fn test_execute_empty_program_rejected() {
        let cmd = ProcessCommand::new("");
        assert!(matches!(
            TokioProcessRunner.execute(&cmd).await,
            Err(E2eError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_times_out_and_kills_child() {
        let cmd = ProcessCommand::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));

        let start = Instant::now();
        let err = TokioProcessRunner.execute(&cmd).await.unwrap_err();
        match err {
            E2eError::Timeout { elapsed, message } => {
                assert_eq!(elapsed, Duration::from_millis(100));
                assert!(message.contains("sleep 5"), "got {}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_execute_within_timeout_succeeds() {
        let cmd = ProcessCommand::new("echo")
            .arg("done")
            .timeout(Duration::from_secs(30));
        let output = TokioProcessRunner.execute(&cmd).await.expect("execute failed");
        assert!(output.stdout_lossy().contains("done"));
    }
}
