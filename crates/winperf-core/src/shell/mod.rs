//! Remote shell abstraction.
//!
//! The collector only needs one capability from the transport: run a command
//! on the device and hand back its output lines and exit code. The
//! `RemoteShell` trait captures that, so the pipeline runs against a real
//! `ssh` client in production and against `MockShell` in tests.

pub mod mock;
pub mod ssh;

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;

pub use mock::MockShell;
pub use ssh::SshShell;

/// Output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn new(stdout: Vec<String>, stderr: Vec<String>, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Builds a result from raw output text, splitting it into lines.
    ///
    /// Both `\n` and `\r\n` endings are accepted.
    pub fn from_output(stdout: &str, stderr: &str, exit_code: i32) -> Self {
        Self {
            stdout: stdout.lines().map(str::to_string).collect(),
            stderr: stderr.lines().map(str::to_string).collect(),
            exit_code,
        }
    }
}

/// Error type for remote command execution.
#[derive(Debug)]
pub enum ShellError {
    /// The local client process could not be started.
    Spawn(io::Error),
    /// The command did not finish in time.
    Timeout(Duration),
    /// The remote channel is not available.
    Unavailable(String),
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::Spawn(e) => write!(f, "failed to start remote shell: {}", e),
            ShellError::Timeout(d) => write!(f, "remote command timed out after {}s", d.as_secs()),
            ShellError::Unavailable(msg) => write!(f, "remote shell unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ShellError {
    fn from(e: io::Error) -> Self {
        ShellError::Spawn(e)
    }
}

/// Executes commands on one remote device.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `command` and waits for it to finish.
    async fn execute(&self, command: &str) -> Result<CommandResult, ShellError>;
}

#[async_trait]
impl<T: RemoteShell + ?Sized> RemoteShell for Box<T> {
    async fn execute(&self, command: &str) -> Result<CommandResult, ShellError> {
        (**self).execute(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_output_splits_lines() {
        let result = CommandResult::from_output("a\r\nb\n", "", 0);
        assert_eq!(result.stdout, vec!["a", "b"]);
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn test_shell_error_display() {
        let e = ShellError::Timeout(Duration::from_secs(60));
        assert_eq!(e.to_string(), "remote command timed out after 60s");
        let e = ShellError::Unavailable("no route".to_string());
        assert_eq!(e.to_string(), "remote shell unavailable: no route");
    }
}
