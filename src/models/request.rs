use crate::errors::ProvisionError;

use super::identifier::{Identifier, Secret};

/// One provisioning run as requested by the operator.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub schema: Identifier,
    pub role: Identifier,
    pub password: Secret,
    /// Drop the destination schema, and everything in it, before recreating it.
    pub recreate: bool,
    /// Point the running application server's datasource at the new schema.
    pub repoint: bool,
    /// Check preconditions and print the transformed definition without mutating anything.
    pub dry_run: bool,
}

impl ProvisionRequest {
    /// Validates raw operator input. Nothing has touched the database yet when this fails.
    pub fn new(
        schema: &str,
        role: &str,
        password: &str,
        source_schema: &Identifier,
    ) -> Result<Self, ProvisionError> {
        let schema = Identifier::parse(schema)?;
        let role = Identifier::parse(role)?;
        let password = Secret::new(password)?;

        if &schema == source_schema {
            return Err(ProvisionError::Usage(format!(
                "destination schema must differ from the source schema {source_schema}"
            )));
        }

        Ok(Self {
            schema,
            role,
            password,
            recreate: false,
            repoint: false,
            dry_run: false,
        })
    }

    pub fn recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    pub fn repoint(mut self, repoint: bool) -> Self {
        self.repoint = repoint;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
