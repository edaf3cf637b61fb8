//! Engine backed by real child processes

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, Engine, Invocation};
use crate::error::{OrbitError, Result};

/// Runs invocations as child processes with a hard timeout.
///
/// The child is killed when the timeout elapses; there is no cooperative
/// cancellation once an invocation is in flight.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEngine;

impl ProcessEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        let command_line = invocation.command_line();
        debug!(
            command = %command_line,
            timeout_secs = invocation.timeout.as_secs(),
            "engine invocation"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(invocation.timeout, cmd.output()).await {
            Err(_) => {
                return Err(OrbitError::CommandTimeout {
                    command: command_line,
                    timeout: invocation.timeout,
                })
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(OrbitError::EngineNotInstalled(invocation.program))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(output)) => output,
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        };

        if output.status.success() {
            Ok(result)
        } else {
            debug!(command = %command_line, code = ?result.code, "engine invocation failed");
            Err(OrbitError::CommandFailed {
                command: command_line,
                code: result.code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}
