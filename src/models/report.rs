use std::fmt;

use serde::Serialize;

use crate::clone::TransformStats;

use super::{
    identifier::Identifier,
    schema::{ObjectKind, SchemaObjects},
};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoleAction {
    Created,
    /// The role existed; its password and login capability were reset.
    Updated,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CloneOutcome {
    /// The transformed definition was replayed into an empty destination.
    Replayed { stats: TransformStats },
    /// The destination already held every source object; nothing was replayed.
    AlreadyPresent,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RepointOutcome {
    NotRequested,
    /// Credentials were rewritten on these datasources and the schema property was set.
    Repointed { datasources: Vec<String> },
    /// None of the configured datasources exist; only the schema property was set.
    PropertyOnly { discovered: Vec<String> },
}

/// Summary of a completed run.
#[derive(Debug, Serialize, Clone)]
pub struct ProvisionReport {
    pub schema: Identifier,
    pub role: Identifier,
    pub source_schema: Identifier,
    pub dropped_existing: bool,
    pub role_action: RoleAction,
    pub clone: CloneOutcome,
    pub objects: SchemaObjects,
    pub repoint: RepointOutcome,
    /// Always false: the clone is structure only.
    pub data_copied: bool,
    /// Operator-facing note that data loading is a separate step.
    pub reminder: &'static str,
}

pub const DATA_REMINDER: &str = "No data has been copied: the new schema holds structure only. \
     Run a separate data-loading/ETL step before pointing users at it.";

pub const RUNTIME_ONLY_WARNING: &str = "The datasource change is a runtime change only. \
     It is lost when the application server container is recreated from its base configuration.";

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Provisioned schema {} for role {}", self.schema, self.role)?;
        if self.dropped_existing {
            writeln!(f, "  dropped and recreated existing schema")?;
        }
        let role = match self.role_action {
            RoleAction::Created => "created",
            RoleAction::Updated => "password updated",
        };
        writeln!(f, "  role: {role}")?;
        match &self.clone {
            CloneOutcome::Replayed { stats } => writeln!(
                f,
                "  structure cloned from {} ({} statements applied, {} dropped, {} rewritten)",
                self.source_schema, stats.applied, stats.dropped, stats.rewritten
            )?,
            CloneOutcome::AlreadyPresent => writeln!(
                f,
                "  structure already present, clone skipped"
            )?,
        }
        writeln!(
            f,
            "  objects: {} tables, {} sequences, {} views",
            self.objects.count(ObjectKind::Table),
            self.objects.count(ObjectKind::Sequence),
            self.objects.count(ObjectKind::View) + self.objects.count(ObjectKind::MaterializedView)
        )?;
        match &self.repoint {
            RepointOutcome::NotRequested => {}
            RepointOutcome::Repointed { datasources } => {
                writeln!(f, "  repointed datasources: {}", datasources.join(", "))?;
                writeln!(f, "  {RUNTIME_ONLY_WARNING}")?;
            }
            RepointOutcome::PropertyOnly { discovered } => {
                writeln!(
                    f,
                    "  schema property updated; datasource credentials NOT updated (found: {})",
                    if discovered.is_empty() {
                        "none".to_string()
                    } else {
                        discovered.join(", ")
                    }
                )?;
                writeln!(f, "  {RUNTIME_ONLY_WARNING}")?;
            }
        }
        write!(f, "{}", self.reminder)
    }
}
