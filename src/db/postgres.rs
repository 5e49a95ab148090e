use std::path::Path;

use async_trait::async_trait;
use log::debug;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool, Row};

use crate::{
    errors::ProvisionError,
    models::{
        identifier::{Identifier, Secret},
        report::RoleAction,
        schema::{ObjectKind, SchemaObjects},
    },
};

use super::{sql, DbClient};

/// A direct connection to the target database.
///
/// Catalog lookups and the role password are sent as bound parameters.
pub struct PostgresClient {
    pub pool: PgPool,
}

impl PostgresClient {
    pub async fn connect(database_url: &str) -> Result<Self, ProvisionError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| ProvisionError::DatabaseUnavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn execute_all(&self, statements: &[String]) -> Result<(), ProvisionError> {
        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DbClient for PostgresClient {
    async fn is_ready(&self) -> Result<(), ProvisionError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ProvisionError::DatabaseUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn schema_exists(&self, schema: &Identifier) -> Result<bool, ProvisionError> {
        let exists = sqlx::query_scalar::<_, bool>(&sql::schema_exists("$1"))
            .bind(schema.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn drop_schema(&self, schema: &Identifier) -> Result<(), ProvisionError> {
        sqlx::query(&sql::drop_schema(schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_schema(&self, schema: &Identifier) -> Result<(), ProvisionError> {
        sqlx::query(&sql::create_schema(schema))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_role(
        &self,
        role: &Identifier,
        password: &Secret,
    ) -> Result<RoleAction, ProvisionError> {
        let exists = sqlx::query_scalar::<_, bool>(&sql::role_exists("$1"))
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?;

        let statement = sqlx::query_scalar::<_, String>(&sql::role_statement(exists, "$1", "$2"))
            .bind(role.as_str())
            .bind(password.expose())
            .fetch_one(&self.pool)
            .await?;
        sqlx::raw_sql(&statement).execute(&self.pool).await?;

        Ok(if exists {
            RoleAction::Updated
        } else {
            RoleAction::Created
        })
    }

    async fn list_objects(&self, schema: &Identifier) -> Result<SchemaObjects, ProvisionError> {
        let rows = sqlx::query(&sql::list_objects("$1"))
            .bind(schema.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut objects = SchemaObjects::default();
        for row in rows {
            let relkind: String = row.try_get("relkind")?;
            let relname: String = row.try_get("relname")?;
            if let Some(kind) = ObjectKind::from_relkind(&relkind) {
                objects.insert(kind, relname);
            }
        }
        Ok(objects)
    }

    async fn apply_script(&self, path: &Path) -> Result<(), ProvisionError> {
        let script = tokio::fs::read_to_string(path).await?;
        debug!("replaying {} bytes from {}", script.len(), path.display());

        let mut tx = self.pool.begin().await?;
        tx.execute(script.as_str()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reassign_ownership(
        &self,
        schema: &Identifier,
        role: &Identifier,
    ) -> Result<usize, ProvisionError> {
        let statements = sqlx::query_scalar::<_, String>(&sql::ownership_statements("$1", "$2"))
            .bind(schema.as_str())
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?;
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
