use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::{
    errors::ProvisionError,
    models::identifier::Identifier,
    runtime::{ContainerRuntime, ExecRequest},
};

use super::SchemaDumper;

/// `pg_dump --schema-only` inside the database container.
pub struct PgDump {
    runtime: Arc<dyn ContainerRuntime + Send + Sync>,
    container: String,
    database: String,
    user: String,
}

impl PgDump {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime + Send + Sync>,
        container: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            container: container.into(),
            database: database.into(),
            user: user.into(),
        }
    }

    fn request(&self, schema: &Identifier) -> ExecRequest {
        ExecRequest::new([
            "pg_dump".to_string(),
            "-U".to_string(),
            self.user.clone(),
            "-d".to_string(),
            self.database.clone(),
            "--schema-only".to_string(),
            "--strict-names".to_string(),
            format!("--schema={schema}"),
        ])
    }
}

#[async_trait]
impl SchemaDumper for PgDump {
    async fn dump_structure(&self, schema: &Identifier) -> Result<String, ProvisionError> {
        let output = self
            .runtime
            .exec(&self.container, self.request(schema))
            .await?
            .into_result("pg_dump")?;
        debug!("pg_dump produced {} bytes for {schema}", output.stdout.len());
        Ok(output.stdout)
    }
}
