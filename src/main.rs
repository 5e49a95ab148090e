use clap::Parser;
use i2b2_provision::{
    models::{
        connections::{ConnectionConfig, DbType},
        identifier::Identifier,
        request::ProvisionRequest,
    },
    ProvisionError, Provisioner, RunOutcome,
};
use log::info;

/// Provision an i2b2 data schema: a login role plus an empty copy of the demo
/// schema's structure, optionally wired into the running application server.
#[derive(Parser, Debug)]
#[command(name = "i2b2-provision", version)]
struct Cli {
    /// Destination schema
    schema: String,
    /// Login role that will own the schema
    role: String,
    /// Password for the role
    password: String,

    /// Drop the destination schema, and all of its contents, before recreating it
    #[arg(long)]
    recreate: bool,
    /// Point the running application server's datasource at the new schema
    #[arg(long)]
    repoint: bool,
    /// Check preconditions and print the transformed definition without changing anything
    #[arg(long)]
    dry_run: bool,
    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Container runtime CLI
    #[arg(long, env = "I2B2_RUNTIME", default_value = "docker")]
    runtime: String,
    #[arg(long, env = "I2B2_DB_CONTAINER", default_value = "i2b2-pg")]
    db_container: String,
    #[arg(long, env = "I2B2_DATABASE", default_value = "i2b2")]
    database: String,
    #[arg(long, env = "I2B2_SUPERUSER", default_value = "postgres")]
    superuser: String,
    /// Schema whose structure is cloned
    #[arg(long, env = "I2B2_SOURCE_SCHEMA", default_value = "i2b2demodata")]
    source_schema: String,
    /// Connect directly instead of running psql inside the database container
    #[arg(long, env = "I2B2_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    #[arg(long, env = "I2B2_APP_CONTAINER", default_value = "i2b2-wildfly")]
    app_container: String,
    #[arg(
        long,
        env = "I2B2_JBOSS_CLI",
        default_value = "/opt/jboss/wildfly/bin/jboss-cli.sh"
    )]
    jboss_cli: String,
    /// Datasources repointed by --repoint, comma separated
    #[arg(
        long,
        env = "I2B2_DATASOURCES",
        value_delimiter = ',',
        default_value = "QueryToolDemoDS"
    )]
    datasources: Vec<String>,
    /// System property holding the active schema name
    #[arg(long, env = "I2B2_SCHEMA_PROPERTY", default_value = "i2b2.crc.schema")]
    schema_property: String,
}

impl Cli {
    fn config(&self) -> Result<ConnectionConfig, ProvisionError> {
        let config = ConnectionConfig {
            runtime: self.runtime.clone(),
            db_container: self.db_container.clone(),
            database: self.database.clone(),
            superuser: self.superuser.clone(),
            source_schema: Identifier::parse(&self.source_schema)?,
            db_type: match &self.database_url {
                Some(database_url) => DbType::Postgres {
                    database_url: database_url.clone(),
                },
                None => DbType::Psql,
            },
            app_container: self.app_container.clone(),
            jboss_cli: self.jboss_cli.clone(),
            datasources: self.datasources.clone(),
            schema_property: self.schema_property.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    fn request(&self, config: &ConnectionConfig) -> Result<ProvisionRequest, ProvisionError> {
        Ok(ProvisionRequest::new(
            &self.schema,
            &self.role,
            &self.password,
            &config.source_schema,
        )?
        .recreate(self.recreate)
        .repoint(self.repoint)
        .dry_run(self.dry_run))
    }
}

async fn run(cli: Cli) -> Result<(), ProvisionError> {
    let config = cli.config()?;
    let request = cli.request(&config)?;

    let provisioner = Provisioner::connect(config).await?;
    match provisioner.run(&request).await? {
        RunOutcome::Completed(report) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
        RunOutcome::DryRun {
            script,
            stats,
            source_objects,
            destination_exists,
        } => {
            if cli.json {
                let plan = serde_json::json!({
                    "schema": request.schema,
                    "destination_exists": destination_exists,
                    "source_objects": source_objects,
                    "stats": stats,
                    "script": script,
                });
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{script}");
                info!(
                    "dry run: {} of {} statements kept, {} rewritten; {} {} exist; nothing was changed",
                    stats.applied,
                    stats.statements,
                    stats.rewritten,
                    request.schema,
                    if destination_exists { "does" } else { "does not" }
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
