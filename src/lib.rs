pub mod appserver;
pub mod clone;
pub mod db;
pub mod errors;
pub mod models;
pub mod provisioner;
pub mod runtime;

pub use errors::ProvisionError;
pub use provisioner::{Provisioner, RunOutcome};
