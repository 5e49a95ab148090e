use thiserror::Error;

/// Error type for every stage of a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A schema or role name that does not match the identifier pattern.
    #[error("Invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: String },
    /// Bad or missing arguments, detected before any side effect.
    #[error("Usage error: {0}")]
    Usage(String),
    #[error("Configuration error: {0}")]
    Config(String),

    /// The named container is not in the runtime's list of running containers.
    #[error("Container {0:?} is not running")]
    ContainerNotRunning(String),
    #[error("Database is not accepting connections: {0}")]
    DatabaseUnavailable(String),
    #[error("Source schema {0:?} does not exist; nothing to clone from")]
    SourceSchemaMissing(String),
    #[error("Application server is not available: {0}")]
    AppServerUnavailable(String),

    /// An external tool exited unsuccessfully. `stderr` is the tool's own output.
    #[error("{program} failed ({code}): {stderr}")]
    Command {
        program: String,
        code: String,
        stderr: String,
    },
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// The management console answered with a failed outcome.
    #[error("Application server operation `{operation}` failed: {description}")]
    AppServer {
        operation: String,
        description: String,
    },
    #[error(
        "Destination schema {schema:?} already holds {present} of {expected} source objects; \
         rerun with --recreate to rebuild it"
    )]
    PartialClone {
        schema: String,
        present: usize,
        expected: usize,
    },
    #[error("Cloned schema {schema:?} does not match the source: missing {missing:?}, unexpected {unexpected:?}")]
    CloneMismatch {
        schema: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
