use async_trait::async_trait;

use crate::{errors::ProvisionError, models::identifier::Secret};

pub mod jboss;

/// The administrative console of the running application server.
#[async_trait]
pub trait AppServerAdmin {
    /// Fails with [`ProvisionError::AppServerUnavailable`] unless the server answers and is running.
    async fn ensure_running(&self) -> Result<(), ProvisionError>;
    async fn list_datasources(&self) -> Result<Vec<String>, ProvisionError>;
    async fn set_datasource_credentials(
        &self,
        datasource: &str,
        user: &str,
        password: &Secret,
    ) -> Result<(), ProvisionError>;
    /// Writes a system property, adding it when it does not exist yet.
    async fn set_system_property(&self, name: &str, value: &str) -> Result<(), ProvisionError>;
    async fn reload(&self) -> Result<(), ProvisionError>;
}
