use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use log::debug;

use crate::{
    errors::ProvisionError,
    models::{
        identifier::{Identifier, Secret},
        report::RoleAction,
        schema::{ObjectKind, SchemaObjects},
    },
    runtime::{ContainerRuntime, ExecRequest},
};

use super::{sql, DbClient};

const FIELD_SEPARATOR: char = '\u{1f}';
const RECORD_SEPARATOR: char = '\u{1e}';

/// A psql script with variables bound through `\set`.
///
/// Variables are referenced in the body as `:'name'` (literal) or `:"name"` (identifier),
/// so psql does the quoting and values never appear on a command line.
#[derive(Debug, Default)]
pub struct PsqlScript {
    vars: Vec<(&'static str, String)>,
    body: String,
}

impl PsqlScript {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            vars: Vec::new(),
            body: body.into(),
        }
    }

    pub fn var(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.vars.push((name, value.into()));
        self
    }

    pub fn render(&self) -> String {
        let mut script = String::new();
        for (name, value) in &self.vars {
            script.push_str(&format!("\\set {name} '{}'\n", escape_meta_argument(value)));
        }
        script.push_str(&self.body);
        if !self.body.trim_end().ends_with(';') && !self.body.trim_end().ends_with("\\gexec") {
            script.push(';');
        }
        script.push('\n');
        script
    }
}

/// Quotes a value for a single-quoted psql meta-command argument.
fn escape_meta_argument(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("''"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Runs SQL through `psql` inside the database container.
pub struct PsqlClient {
    runtime: Arc<dyn ContainerRuntime + Send + Sync>,
    container: String,
    database: String,
    user: String,
}

impl PsqlClient {
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

    fn argv(&self, extra: &[&str]) -> Vec<String> {
        let mut argv = vec![
            "psql".to_string(),
            "-X".to_string(),
            "-q".to_string(),
            "-A".to_string(),
            "-t".to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "-F".to_string(),
            FIELD_SEPARATOR.to_string(),
            "-R".to_string(),
            RECORD_SEPARATOR.to_string(),
            "-U".to_string(),
            self.user.clone(),
            "-d".to_string(),
            self.database.clone(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.extend(["-f".to_string(), "-".to_string()]);
        argv
    }

    async fn run(&self, script: &PsqlScript, extra: &[&str]) -> Result<String, ProvisionError> {
        let request = ExecRequest::new(self.argv(extra)).stdin(script.render());
        let output = self
            .runtime
            .exec(&self.container, request)
            .await?
            .into_result("psql")?;
        Ok(output.stdout)
    }

    async fn rows(&self, script: &PsqlScript) -> Result<Vec<Vec<String>>, ProvisionError> {
        let stdout = self.run(script, &[]).await?;
        Ok(parse_rows(&stdout))
    }

    async fn scalar_bool(&self, script: &PsqlScript) -> Result<bool, ProvisionError> {
        let rows = self.rows(script).await?;
        match rows.first().and_then(|row| row.first()).map(String::as_str) {
            Some("t") => Ok(true),
            Some("f") => Ok(false),
            other => Err(ProvisionError::Command {
                program: "psql".into(),
                code: "exit 0".into(),
                stderr: format!("expected a boolean, got {other:?}"),
            }),
        }
    }

    async fn execute_all(&self, statements: &[String]) -> Result<(), ProvisionError> {
        if statements.is_empty() {
            return Ok(());
        }
        let body = statements
            .iter()
            .map(|s| format!("{s};"))
            .collect::<Vec<_>>()
            .join("\n");
        self.run(&PsqlScript::new(body), &["--single-transaction"])
            .await
            .map(|_| ())
    }
}

fn parse_rows(stdout: &str) -> Vec<Vec<String>> {
    stdout
        .split(RECORD_SEPARATOR)
        .map(|record| record.trim_matches(|c| c == '\n' || c == '\r'))
        .filter(|record| !record.is_empty())
        .map(|record| record.split(FIELD_SEPARATOR).map(String::from).collect())
        .collect()
}

#[async_trait]
impl DbClient for PsqlClient {
    async fn is_ready(&self) -> Result<(), ProvisionError> {
        let request = ExecRequest::new([
            "pg_isready",
            "-U",
            self.user.as_str(),
            "-d",
            self.database.as_str(),
        ]);
        let output = self.runtime.exec(&self.container, request).await?;
        if output.success() {
            return Ok(());
        }
        let detail = [output.stdout.trim(), output.stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(": ");
        Err(ProvisionError::DatabaseUnavailable(detail))
    }

    async fn schema_exists(&self, schema: &Identifier) -> Result<bool, ProvisionError> {
        let script =
            PsqlScript::new(sql::schema_exists(":'schema'")).var("schema", schema.as_str());
        self.scalar_bool(&script).await
    }

    async fn drop_schema(&self, schema: &Identifier) -> Result<(), ProvisionError> {
        self.execute_all(&[sql::drop_schema(schema)]).await
    }

    async fn create_schema(&self, schema: &Identifier) -> Result<(), ProvisionError> {
        self.execute_all(&[sql::create_schema(schema)]).await
    }

    async fn upsert_role(
        &self,
        role: &Identifier,
        password: &Secret,
    ) -> Result<RoleAction, ProvisionError> {
        let exists = self
            .scalar_bool(&PsqlScript::new(sql::role_exists(":'role'")).var("role", role.as_str()))
            .await?;

        let body = format!(
            "{} \\gexec",
            sql::role_statement(exists, ":'role'", ":'password'")
        );
        let script = PsqlScript::new(body)
            .var("role", role.as_str())
            .var("password", password.expose());
        self.run(&script, &[]).await?;

        Ok(if exists {
            RoleAction::Updated
        } else {
            RoleAction::Created
        })
    }

    async fn list_objects(&self, schema: &Identifier) -> Result<SchemaObjects, ProvisionError> {
        let script =
            PsqlScript::new(sql::list_objects(":'schema'")).var("schema", schema.as_str());
        let mut objects = SchemaObjects::default();
        for row in self.rows(&script).await? {
            if let [relkind, relname] = row.as_slice() {
                if let Some(kind) = ObjectKind::from_relkind(relkind) {
                    objects.insert(kind, relname.clone());
                }
            }
        }
        Ok(objects)
    }

    async fn apply_script(&self, path: &Path) -> Result<(), ProvisionError> {
        let script = tokio::fs::read_to_string(path).await?;
        debug!("replaying {} bytes from {}", script.len(), path.display());
        let request = ExecRequest::new(self.argv(&["--single-transaction"])).stdin(script);
        self.runtime
            .exec(&self.container, request)
            .await?
            .into_result("psql")?;
        Ok(())
    }

    async fn reassign_ownership(
        &self,
        schema: &Identifier,
        role: &Identifier,
    ) -> Result<usize, ProvisionError> {
        let script = PsqlScript::new(sql::ownership_statements(":'schema'", ":'role'"))
            .var("schema", schema.as_str())
            .var("role", role.as_str());
        let statements: Vec<String> = self
            .rows(&script)
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect();
        self.execute_all(&statements).await?;
        Ok(statements.len())
    }

    async fn grant_privileges(
        &self,
        schema: &Identifier,
        role: &Identifier,
    ) -> Result<(), ProvisionError> {
        self.execute_all(&sql::grant_privileges(schema, role)).await
    }
}
