use std::path::Path;

use async_trait::async_trait;

use crate::{
    errors::ProvisionError,
    models::{
        identifier::{Identifier, Secret},
        report::RoleAction,
        schema::SchemaObjects,
    },
};

pub mod pg_dump;
pub mod postgres;
pub mod psql;
pub mod sql;

/// The statements a provisioning run issues against the target database.
#[async_trait]
pub trait DbClient {
    /// Fails with [`ProvisionError::DatabaseUnavailable`] unless the server accepts connections.
    async fn is_ready(&self) -> Result<(), ProvisionError>;
    async fn schema_exists(&self, schema: &Identifier) -> Result<bool, ProvisionError>;
    async fn drop_schema(&self, schema: &Identifier) -> Result<(), ProvisionError>;
    async fn create_schema(&self, schema: &Identifier) -> Result<(), ProvisionError>;
    /// Creates the login role, or resets the password and login flag of an existing one.
    async fn upsert_role(
        &self,
        role: &Identifier,
        password: &Secret,
    ) -> Result<RoleAction, ProvisionError>;
    async fn list_objects(&self, schema: &Identifier) -> Result<SchemaObjects, ProvisionError>;
    /// Runs a SQL script file as one transaction.
    async fn apply_script(&self, path: &Path) -> Result<(), ProvisionError>;
    /// Re-owns every relation in `schema` to `role`. Returns how many were changed.
    async fn reassign_ownership(
        &self,
        schema: &Identifier,
        role: &Identifier,
    ) -> Result<usize, ProvisionError>;
    async fn grant_privileges(
        &self,
        schema: &Identifier,
        role: &Identifier,
    ) -> Result<(), ProvisionError>;
}

/// Produces a structure-only SQL definition of a schema.
#[async_trait]
pub trait SchemaDumper {
    async fn dump_structure(&self, schema: &Identifier) -> Result<String, ProvisionError>;
}
