use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::errors::ProvisionError;

use super::{ContainerRuntime, ExecOutput, ExecRequest};

/// Talks to containers through the `docker` CLI, or any CLI with the same
/// `ps`/`exec` surface such as `podman`.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<ExecOutput, ProvisionError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ProvisionError::Config(format!("cannot run container runtime {:?}: {e}", self.binary))
        })?;

        // stdin is written concurrently: the child may fill its stdout pipe before reading it all.
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_string();
                Some(tokio::spawn(async move {
                    pipe.write_all(input.as_bytes()).await?;
                    pipe.shutdown().await
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The child exited without reading everything; its own error output says why.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => return Err(ProvisionError::Io(std::io::Error::other(e))),
            }
        }
        Ok(ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_running(&self) -> Result<Vec<String>, ProvisionError> {
        let args = ["ps", "--format", "{{.Names}}"].map(String::from);
        let output = self.run(&args, None).await?.into_result(&self.binary)?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect())
    }

    async fn exec(
        &self,
        container: &str,
        request: ExecRequest,
    ) -> Result<ExecOutput, ProvisionError> {
        debug!("{} exec {container} {}", self.binary, request.program());

        let mut args = vec!["exec".to_string()];
        if request.stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push(container.to_string());
        args.extend(request.argv);

        self.run(&args, request.stdin.as_deref()).await
    }
}
