use async_trait::async_trait;

use crate::errors::ProvisionError;

pub mod docker;

/// A command to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    /// Written to the process's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl ExecRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turns a failed exit into [`ProvisionError::Command`], keeping the tool's own
    /// error text.
    pub fn into_result(self, program: &str) -> Result<ExecOutput, ProvisionError> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(ProvisionError::Command {
            program: program.to_string(),
            code: self
                .code
                .map_or_else(|| "killed by signal".to_string(), |c| format!("exit {c}")),
            stderr,
        })
    }
}

/// A container runtime that can run commands inside named, running containers.
#[async_trait]
pub trait ContainerRuntime {
    /// Names of all running containers.
    async fn list_running(&self) -> Result<Vec<String>, ProvisionError>;
    async fn exec(&self, container: &str, request: ExecRequest)
        -> Result<ExecOutput, ProvisionError>;
}

/// Fails with [`ProvisionError::ContainerNotRunning`] unless `container` is running.
pub async fn ensure_running(
    runtime: &(dyn ContainerRuntime + Send + Sync),
    container: &str,
) -> Result<(), ProvisionError> {
    let running = runtime.list_running().await?;
    if running.iter().any(|name| name == container) {
        Ok(())
    } else {
        Err(ProvisionError::ContainerNotRunning(container.to_string()))
    }
}
