//! Scripted remote shell for tests.
//!
//! `MockShell` replays queued responses in order and records every command
//! it was asked to run, so collector tests can run without a Windows host.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{CommandResult, RemoteShell, ShellError};

/// Remote shell that answers from a queue of prepared results.
#[derive(Debug, Default)]
pub struct MockShell {
    responses: Mutex<VecDeque<Result<CommandResult, ShellError>>>,
    commands: Mutex<Vec<String>>,
}

impl MockShell {
    /// Creates a mock with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful command result.
    pub fn respond(self, result: CommandResult) -> Self {
        self.push(Ok(result));
        self
    }

    /// Queues a transport error.
    pub fn fail(self, error: ShellError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, response: Result<CommandResult, ShellError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A healthy two-counter `Format-List` response from `sqlsrv02`.
    pub fn typical_readings() -> CommandResult {
        CommandResult::from_output(
            concat!(
                "\r\n",
                "Readings : \\\\sqlsrv02\\memory\\available bytes :\r\n",
                "           2736390144\r\n",
                "\r\n",
                "           \\\\sqlsrv02\\processor(_total)\\% processor time :\r\n",
                "           3.125\r\n",
                "\r\n",
                "\r\n",
            ),
            "",
            0,
        )
    }

    /// A response cut off after the second counter path.
    pub fn truncated_readings() -> CommandResult {
        CommandResult::from_output(
            concat!(
                "\r\n",
                "Readings : \\\\sqlsrv02\\memory\\available bytes :\r\n",
                "           2736390144\r\n",
                "\r\n",
                "           \\\\sqlsrv02\\processor(_total)\\% processor time :\r\n",
            ),
            "",
            0,
        )
    }

    /// A failed `Get-Counter` run: nothing on stdout, error text on stderr.
    pub fn access_denied() -> CommandResult {
        CommandResult::from_output(
            "",
            "Get-Counter : Access is denied.\r\n\
             At line:1 char:1\r\n",
            1,
        )
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn execute(&self, command: &str) -> Result<CommandResult, ShellError> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(ShellError::Unavailable("no scripted response".to_string())))
    }
}
