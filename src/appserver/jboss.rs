use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    errors::ProvisionError,
    models::identifier::Secret,
    runtime::{ContainerRuntime, ExecRequest},
};

use super::AppServerAdmin;

/// Management operation response, as printed by `jboss-cli.sh --output-json`.
#[derive(Debug, Deserialize)]
struct CliResponse {
    outcome: String,
    #[serde(default)]
    result: Value,
    #[serde(rename = "failure-description", default)]
    failure_description: Option<Value>,
}

/// Quotes a string for use as a DMR operation parameter.
fn dmr_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// WildFly management through `jboss-cli.sh` inside the application-server container.
pub struct JbossCli {
    runtime: Arc<dyn ContainerRuntime + Send + Sync>,
    container: String,
    cli_path: String,
}

impl JbossCli {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime + Send + Sync>,
        container: impl Into<String>,
        cli_path: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            container: container.into(),
            cli_path: cli_path.into(),
        }
    }

    async fn run(&self, operation: &str) -> Result<CliResponse, ProvisionError> {
        let request = ExecRequest::new([
            self.cli_path.clone(),
            "--connect".to_string(),
            "--output-json".to_string(),
            format!("--command={operation}"),
        ]);
        let output = self.runtime.exec(&self.container, request).await?;

        match serde_json::from_str::<CliResponse>(output.stdout.trim()) {
            Ok(response) => Ok(response),
            Err(e) => {
                // Without a JSON answer the CLI's own error output is the useful part.
                output.into_result("jboss-cli")?;
                Err(ProvisionError::AppServer {
                    operation: describe(operation),
                    description: format!("unreadable response: {e}"),
                })
            }
        }
    }

    /// Runs an operation that must succeed and returns its result.
    async fn invoke(&self, operation: &str) -> Result<Value, ProvisionError> {
        let response = self.run(operation).await?;
        if response.outcome == "success" {
            return Ok(response.result);
        }
        Err(ProvisionError::AppServer {
            operation: describe(operation),
            description: response
                .failure_description
                .map(|d| match d {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| response.outcome.clone()),
        })
    }
}

/// Operation text with parameter values cut off, safe to show in errors and logs.
fn describe(operation: &str) -> String {
    operation
        .split_once('(')
        .map_or(operation, |(head, _)| head)
        .to_string()
}

#[async_trait]
impl AppServerAdmin for JbossCli {
    async fn ensure_running(&self) -> Result<(), ProvisionError> {
        let state = self
            .invoke(":read-attribute(name=server-state)")
            .await
            .map_err(|e| ProvisionError::AppServerUnavailable(e.to_string()))?;
        match state.as_str() {
            Some("running") => Ok(()),
            other => Err(ProvisionError::AppServerUnavailable(format!(
                "server state is {}",
                other.unwrap_or("unknown")
            ))),
        }
    }

    async fn list_datasources(&self) -> Result<Vec<String>, ProvisionError> {
        let result = self
            .invoke("/subsystem=datasources:read-children-names(child-type=data-source)")
            .await?;
        Ok(result
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_datasource_credentials(
        &self,
        datasource: &str,
        user: &str,
        password: &Secret,
    ) -> Result<(), ProvisionError> {
        let resource = format!("/subsystem=datasources/data-source={datasource}");
        self.invoke(&format!(
            "{resource}:write-attribute(name=user-name,value={})",
            dmr_string(user)
        ))
        .await?;
        self.invoke(&format!(
            "{resource}:write-attribute(name=password,value={})",
            dmr_string(password.expose())
        ))
        .await?;
        info!("datasource {datasource} now connects as {user}");
        Ok(())
    }

    async fn set_system_property(&self, name: &str, value: &str) -> Result<(), ProvisionError> {
        let resource = format!("/system-property={name}");
        let exists = self.run(&format!("{resource}:read-resource")).await?.outcome == "success";
        let operation = if exists {
            format!("{resource}:write-attribute(name=value,value={})", dmr_string(value))
        } else {
            format!("{resource}:add(value={})", dmr_string(value))
        };
        debug!("{} system property {name}", if exists { "writing" } else { "adding" });
        self.invoke(&operation).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), ProvisionError> {
        self.invoke(":reload").await?;
        Ok(())
    }
}
