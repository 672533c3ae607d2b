//! Remote shell backed by the system `ssh` client.
//!
//! Authentication and host keys are left to the ssh configuration of the
//! user running the collector; the client runs in batch mode so a missing
//! key fails fast instead of prompting.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, RemoteShell, ShellError};

/// Exit code reported when the remote process was killed by a signal.
const SIGNALLED_EXIT_CODE: i32 = -1;

/// Runs commands on a Windows host through OpenSSH.
#[derive(Debug, Clone)]
pub struct SshShell {
    address: String,
    user: Option<String>,
    port: Option<u16>,
    binary: String,
    timeout: Duration,
}

impl SshShell {
    /// Creates a shell for `address` using the `ssh` binary on `PATH`.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            user: None,
            port: None,
            binary: "ssh".to_string(),
            timeout,
        }
    }

    /// Logs in as `user` instead of the ssh default.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Connects to a non-default port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Uses a specific ssh client binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// `user@address`, or just the address.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }

    /// Arguments passed to the ssh client, the remote command last.
    fn args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.destination());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn execute(&self, command: &str) -> Result<CommandResult, ShellError> {
        trace!(address = %self.address, command, "running remote command");

        let child = Command::new(&self.binary)
            .args(self.args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(ShellError::Timeout(self.timeout)),
        };

        let exit_code = output.status.code().unwrap_or(SIGNALLED_EXIT_CODE);
        debug!(
            address = %self.address,
            exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "remote command finished"
        );

        Ok(CommandResult::from_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            exit_code,
        ))
    }
}
