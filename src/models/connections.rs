use std::sync::LazyLock;

use regex::Regex;
use crate::errors::ProvisionError;

use super::identifier::Identifier;

static MANAGEMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid regex"));

/// How SQL statements reach the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbType {
    /// `psql` executed inside the database container.
    Psql,
    /// A direct connection from this process.
    Postgres { database_url: String },
}

/// Everything a run needs to know about the deployment it is talking to.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Container runtime CLI, usually `docker` or `podman`.
    pub runtime: String,
    pub db_container: String,
    pub database: String,
    pub superuser: String,
    pub source_schema: Identifier,
    pub db_type: DbType,
    pub app_container: String,
    pub jboss_cli: String,
    /// Datasources repointed by `--repoint`, in lookup order.
    pub datasources: Vec<String>,
    /// System property carrying the active schema name.
    pub schema_property: String,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ProvisionError> {
        for (what, value) in [
            ("runtime", &self.runtime),
            ("database container", &self.db_container),
            ("database", &self.database),
            ("superuser", &self.superuser),
            ("application container", &self.app_container),
            ("jboss-cli path", &self.jboss_cli),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::Config(format!("{what} must not be empty")));
            }
        }

        if self.datasources.is_empty() {
            return Err(ProvisionError::Config(
                "at least one datasource name is required".into(),
            ));
        }
        for name in self.datasources.iter().chain([&self.schema_property]) {
            if !MANAGEMENT_NAME.is_match(name) {
                return Err(ProvisionError::Config(format!(
                    "{name:?} is not a valid management resource name"
                )));
            }
        }

        Ok(())
    }

    /// Database URL with the password replaced, for log output.
    pub fn display_target(&self) -> String {
        match &self.db_type {
            DbType::Psql => format!(
                "psql in container {} (database {}, user {})",
                self.db_container, self.database, self.superuser
            ),
            DbType::Postgres { database_url } => mask_password(database_url),
        }
    }
}

/// Mask the password in a connection URL.
pub fn mask_password(url: &str) -> String {
    if let Some(start) = url.find("://") {
        if let Some(at) = url.rfind('@') {
            if at > start {
                let prefix = &url[..start + 3];
                let suffix = &url[at..];
                if let Some(colon) = url[start + 3..at].find(':') {
                    let user = &url[start + 3..start + 3 + colon];
                    return format!("{}{}:***{}", prefix, user, suffix);
                }
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
pub(crate) fn sample_config() -> ConnectionConfig {
    ConnectionConfig {
        runtime: "docker".into(),
        db_container: "i2b2-pg".into(),
        database: "i2b2".into(),
        superuser: "postgres".into(),
        source_schema: Identifier::parse("i2b2demodata").unwrap(),
        db_type: DbType::Psql,
        app_container: "i2b2-wildfly".into(),
        jboss_cli: "/opt/jboss/wildfly/bin/jboss-cli.sh".into(),
        datasources: vec!["QueryToolDemoDS".into()],
        schema_property: "i2b2.crc.schema".into(),
    }
}
