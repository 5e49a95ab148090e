use std::{io::Write, sync::Arc};

use log::{debug, info, warn};

use crate::{
    appserver::{jboss::JbossCli, AppServerAdmin},
    clone::{SchemaTransform, TransformStats},
    db::{pg_dump::PgDump, postgres::PostgresClient, psql::PsqlClient, DbClient, SchemaDumper},
    errors::ProvisionError,
    models::{
        connections::{ConnectionConfig, DbType},
        report::{
            CloneOutcome, ProvisionReport, RepointOutcome, DATA_REMINDER, RUNTIME_ONLY_WARNING,
        },
        request::ProvisionRequest,
        schema::SchemaObjects,
    },
    runtime::{docker::DockerCli, ensure_running, ContainerRuntime},
};

/// Result of a run: a completed provisioning, or the plan of a dry run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(ProvisionReport),
    DryRun {
        script: String,
        stats: TransformStats,
        source_objects: SchemaObjects,
        destination_exists: bool,
    },
}

pub struct Provisioner {
    config: ConnectionConfig,
    runtime: Arc<dyn ContainerRuntime + Send + Sync>,
    db: Box<dyn DbClient + Send + Sync>,
    dumper: Box<dyn SchemaDumper + Send + Sync>,
    app: Box<dyn AppServerAdmin + Send + Sync>,
}

impl Provisioner {
    pub fn new(
        config: ConnectionConfig,
        runtime: Arc<dyn ContainerRuntime + Send + Sync>,
        db: Box<dyn DbClient + Send + Sync>,
        dumper: Box<dyn SchemaDumper + Send + Sync>,
        app: Box<dyn AppServerAdmin + Send + Sync>,
    ) -> Self {
        Self {
            config,
            runtime,
            db,
            dumper,
            app,
        }
    }

    /// Wires the production collaborators described by `config`.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ProvisionError> {
        config.validate()?;

        let runtime: Arc<dyn ContainerRuntime + Send + Sync> =
            Arc::new(DockerCli::new(config.runtime.clone()));
        let db: Box<dyn DbClient + Send + Sync> = match &config.db_type {
            DbType::Psql => Box::new(PsqlClient::new(
                runtime.clone(),
                config.db_container.clone(),
                config.database.clone(),
                config.superuser.clone(),
            )),
            DbType::Postgres { database_url } => {
                Box::new(PostgresClient::connect(database_url).await?)
            }
        };
        let dumper = Box::new(PgDump::new(
            runtime.clone(),
            config.db_container.clone(),
            config.database.clone(),
            config.superuser.clone(),
        ));
        let app = Box::new(JbossCli::new(
            runtime.clone(),
            config.app_container.clone(),
            config.jboss_cli.clone(),
        ));

        Ok(Self::new(config, runtime, db, dumper, app))
    }

    pub async fn run(&self, request: &ProvisionRequest) -> Result<RunOutcome, ProvisionError> {
        let source = &self.config.source_schema;
        let dest = &request.schema;

        self.check_preconditions(request).await?;
        let source_objects = self.db.list_objects(source).await?;
        if source_objects.is_empty() {
            warn!("source schema {source} has no tables or sequences");
        }

        if request.dry_run {
            let dump = self.dumper.dump_structure(source).await?;
            let transformed = SchemaTransform::new(source, dest, &request.role)?.apply(&dump);
            return Ok(RunOutcome::DryRun {
                script: transformed.script,
                stats: transformed.stats,
                source_objects,
                destination_exists: self.db.schema_exists(dest).await?,
            });
        }

        let mut dropped_existing = false;
        if request.recreate {
            dropped_existing = self.db.schema_exists(dest).await?;
            warn!("dropping schema {dest} and everything in it");
            self.db.drop_schema(dest).await?;
        }

        self.db.create_schema(dest).await?;
        info!("schema {dest} is present");

        let role_action = self.db.upsert_role(&request.role, &request.password).await?;
        info!("role {}: {role_action:?}", request.role);

        let clone = self.clone_structure(request, &source_objects).await?;

        self.db.grant_privileges(dest, &request.role).await?;
        info!(
            "granted usage and CRUD on {dest}, including future tables and sequences, to {}",
            request.role
        );

        let objects = self.db.list_objects(dest).await?;
        warn!("{DATA_REMINDER}");

        let repoint = if request.repoint {
            self.repoint(request).await?
        } else {
            RepointOutcome::NotRequested
        };

        Ok(RunOutcome::Completed(ProvisionReport {
            schema: dest.clone(),
            role: request.role.clone(),
            source_schema: source.clone(),
            dropped_existing,
            role_action,
            clone,
            objects,
            repoint,
            data_copied: false,
            reminder: DATA_REMINDER,
        }))
    }

    /// Nothing is mutated until every check here has passed.
    async fn check_preconditions(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        let source = &self.config.source_schema;

        info!("checking database: {}", self.config.display_target());
        ensure_running(self.runtime.as_ref(), &self.config.db_container).await?;
        self.db.is_ready().await?;

        if !self.db.schema_exists(source).await? {
            return Err(ProvisionError::SourceSchemaMissing(source.to_string()));
        }

        if request.repoint {
            info!("checking application server in {}", self.config.app_container);
            ensure_running(self.runtime.as_ref(), &self.config.app_container)
                .await
                .map_err(|e| ProvisionError::AppServerUnavailable(e.to_string()))?;
            self.app.ensure_running().await?;
        }

        Ok(())
    }

    async fn clone_structure(
        &self,
        request: &ProvisionRequest,
        source_objects: &SchemaObjects,
    ) -> Result<CloneOutcome, ProvisionError> {
        let source = &self.config.source_schema;
        let dest = &request.schema;

        let existing = self.db.list_objects(dest).await?;
        let present = existing.overlap(source_objects);

        let outcome = if !source_objects.is_empty() && present == source_objects.len() {
            info!("{dest} already holds the structure of {source}; skipping replay");
            CloneOutcome::AlreadyPresent
        } else if present == 0 {
            if !existing.is_empty() {
                info!(
                    "{dest} holds {} objects unrelated to {source}; they are kept",
                    existing.len()
                );
            }
            let dump = self.dumper.dump_structure(source).await?;
            let transformed = SchemaTransform::new(source, dest, &request.role)?.apply(&dump);
            info!(
                "cloning {source} into {dest}: {} statements, {} dropped, {} rewritten",
                transformed.stats.applied, transformed.stats.dropped, transformed.stats.rewritten
            );

            let mut file = tempfile::Builder::new()
                .prefix("i2b2-provision-")
                .suffix(".sql")
                .tempfile()?;
            file.write_all(transformed.script.as_bytes())?;
            file.flush()?;
            debug!("transformed definition at {}", file.path().display());

            self.db.apply_script(file.path()).await?;
            file.close()?;

            CloneOutcome::Replayed {
                stats: transformed.stats,
            }
        } else {
            return Err(ProvisionError::PartialClone {
                schema: dest.to_string(),
                present,
                expected: source_objects.len(),
            });
        };

        let reowned = self.db.reassign_ownership(dest, &request.role).await?;
        if reowned > 0 {
            info!("re-owned {reowned} relations in {dest} to {}", request.role);
        }

        if matches!(outcome, CloneOutcome::Replayed { .. }) {
            let cloned = self.db.list_objects(dest).await?;
            let (missing, unexpected) = cloned.diff(&source_objects.union(&existing));
            if !missing.is_empty() || !unexpected.is_empty() {
                return Err(ProvisionError::CloneMismatch {
                    schema: dest.to_string(),
                    missing,
                    unexpected,
                });
            }
        }

        Ok(outcome)
    }

    async fn repoint(&self, request: &ProvisionRequest) -> Result<RepointOutcome, ProvisionError> {
        let discovered = self.app.list_datasources().await?;
        let targets: Vec<String> = self
            .config
            .datasources
            .iter()
            .filter(|name| discovered.contains(name))
            .cloned()
            .collect();

        for datasource in &targets {
            self.app
                .set_datasource_credentials(datasource, request.role.as_str(), &request.password)
                .await?;
        }
        self.app
            .set_system_property(&self.config.schema_property, request.schema.as_str())
            .await?;
        self.app.reload().await?;
        warn!("{RUNTIME_ONLY_WARNING}");

        if targets.is_empty() {
            warn!(
                "none of the datasources {:?} exist (found: {:?}); only {} was updated, \
                 update the datasource credentials manually",
                self.config.datasources, discovered, self.config.schema_property
            );
            Ok(RepointOutcome::PropertyOnly { discovered })
        } else {
            Ok(RepointOutcome::Repointed {
                datasources: targets,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        appserver::tests::MockAppServer,
        db::tests::{MockDbClientMock, MockDumper},
        models::{
            connections::sample_config,
            identifier::Identifier,
            report::RoleAction,
            schema::ObjectKind,
        },
        runtime::tests::MockRuntime,
    };
    use mockall::Sequence;

    const DUMP: &str = "\
SET statement_timeout = 0;
SELECT pg_catalog.set_config('search_path', '', false);
CREATE SCHEMA i2b2demodata;
ALTER SCHEMA i2b2demodata OWNER TO i2b2demodata;
CREATE TABLE i2b2demodata.observation_fact (
    encounter_num integer NOT NULL,
    concept_cd character varying(50) NOT NULL
);
ALTER TABLE i2b2demodata.observation_fact OWNER TO i2b2demodata;
CREATE SEQUENCE i2b2demodata.qt_query_master_query_master_id_seq;
ALTER SEQUENCE i2b2demodata.qt_query_master_query_master_id_seq OWNER TO i2b2demodata;
GRANT ALL ON TABLE i2b2demodata.observation_fact TO i2b2demodata;
";

    fn source_objects() -> SchemaObjects {
        let mut objects = SchemaObjects::default();
        objects.insert(ObjectKind::Table, "observation_fact");
        objects.insert(ObjectKind::Sequence, "qt_query_master_query_master_id_seq");
        objects
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest::new(
            "i2b2prod",
            "i2b2app",
            "s3cret",
            &Identifier::parse("i2b2demodata").unwrap(),
        )
        .unwrap()
    }

    struct Mocks {
        runtime: MockRuntime,
        db: MockDbClientMock,
        dumper: MockDumper,
        app: MockAppServer,
    }

    impl Mocks {
        /// Both containers running, database ready, source schema present.
        fn ready() -> Self {
            let mut runtime = MockRuntime::new();
            runtime
                .expect_list_running()
                .returning(|| Ok(vec!["i2b2-pg".into(), "i2b2-wildfly".into()]));

            let mut db = MockDbClientMock::new();
            db.expect_is_ready().returning(|| Ok(()));
            db.expect_schema_exists()
                .withf(|s| s.as_str() == "i2b2demodata")
                .returning(|_| Ok(true));
            db.expect_list_objects()
                .withf(|s| s.as_str() == "i2b2demodata")
                .returning(|_| Ok(source_objects()));

            Self {
                runtime,
                db,
                dumper: MockDumper::new(),
                app: MockAppServer::new(),
            }
        }

        /// Create, role, grants and ownership all succeed.
        fn mutations_succeed(&mut self) {
            self.db.expect_create_schema().times(1).returning(|_| Ok(()));
            self.db
                .expect_upsert_role()
                .times(1)
                .returning(|_, _| Ok(RoleAction::Created));
            self.db
                .expect_reassign_ownership()
                .times(1)
                .returning(|_, _| Ok(0));
            self.db
                .expect_grant_privileges()
                .withf(|s, r| s.as_str() == "i2b2prod" && r.as_str() == "i2b2app")
                .times(1)
                .returning(|_, _| Ok(()));
        }

        /// Destination empty on first inspection, cloned afterwards.
        fn fresh_destination(&mut self) {
            let mut calls = 0;
            self.db
                .expect_list_objects()
                .withf(|s| s.as_str() == "i2b2prod")
                .returning(move |_| {
                    calls += 1;
                    Ok(if calls == 1 {
                        SchemaObjects::default()
                    } else {
                        source_objects()
                    })
                });
            self.dumper
                .expect_dump_structure()
                .times(1)
                .returning(|_| Ok(DUMP.to_string()));
            self.db
                .expect_apply_script()
                .times(1)
                .withf(|path| {
                    let script = std::fs::read_to_string(path).unwrap_or_default();
                    script.contains("CREATE TABLE i2b2prod.observation_fact")
                        && script.contains("OWNER TO \"i2b2app\"")
                        && !script.contains("i2b2demodata")
                        && !script.contains("GRANT")
                        && !script.contains("CREATE SCHEMA")
                })
                .returning(|_| Ok(()));
        }

        fn provisioner(self) -> Provisioner {
            Provisioner::new(
                sample_config(),
                Arc::new(self.runtime),
                Box::new(self.db),
                Box::new(self.dumper),
                Box::new(self.app),
            )
        }
    }

    fn completed(outcome: RunOutcome) -> ProvisionReport {
        match outcome {
            RunOutcome::Completed(report) => report,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fresh_provision_clones_structure() {
        let mut mocks = Mocks::ready();
        mocks.mutations_succeed();
        mocks.fresh_destination();

        let report = completed(mocks.provisioner().run(&request()).await.unwrap());
        assert_eq!(report.role_action, RoleAction::Created);
        assert!(!report.dropped_existing);
        assert!(!report.data_copied);
        assert_eq!(report.objects, source_objects());
        assert_eq!(report.repoint, RepointOutcome::NotRequested);
        match &report.clone {
            CloneOutcome::Replayed { stats } => {
                assert_eq!(stats.rules["strip-schema-statements"].dropped, 2);
                assert_eq!(stats.rules["strip-privileges"].dropped, 1);
            }
            other => panic!("expected a replay, got {other:?}"),
        }
        assert_eq!(report.reminder, DATA_REMINDER);
        assert!(report.to_string().ends_with(DATA_REMINDER));
    }

    #[tokio::test]
    async fn test_unrelated_objects_do_not_block_replay() {
        let mut mocks = Mocks::ready();
        mocks.mutations_succeed();
        let mut calls = 0;
        mocks
            .db
            .expect_list_objects()
            .withf(|s| s.as_str() == "i2b2prod")
            .returning(move |_| {
                calls += 1;
                let mut objects = if calls == 1 {
                    SchemaObjects::default()
                } else {
                    source_objects()
                };
                objects.insert(ObjectKind::Table, "scratch");
                Ok(objects)
            });
        mocks
            .dumper
            .expect_dump_structure()
            .times(1)
            .returning(|_| Ok(DUMP.to_string()));
        mocks.db.expect_apply_script().times(1).returning(|_| Ok(()));

        let report = completed(mocks.provisioner().run(&request()).await.unwrap());
        assert!(matches!(report.clone, CloneOutcome::Replayed { .. }));
        assert_eq!(report.objects.len(), 3);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let mut mocks = Mocks::ready();
        mocks.mutations_succeed();
        mocks
            .db
            .expect_list_objects()
            .withf(|s| s.as_str() == "i2b2prod")
            .returning(|_| {
                let mut objects = source_objects();
                objects.insert(ObjectKind::Table, "added_later");
                Ok(objects)
            });

        let report = completed(mocks.provisioner().run(&request()).await.unwrap());
        assert_eq!(report.clone, CloneOutcome::AlreadyPresent);
        assert_eq!(report.objects.count(ObjectKind::Table), 2);
    }

    #[tokio::test]
    async fn test_missing_source_schema_fails_before_mutation() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_list_running()
            .returning(|| Ok(vec!["i2b2-pg".into()]));
        let mut db = MockDbClientMock::new();
        db.expect_is_ready().returning(|| Ok(()));
        db.expect_schema_exists().returning(|_| Ok(false));

        let provisioner = Provisioner::new(
            sample_config(),
            Arc::new(runtime),
            Box::new(db),
            Box::new(MockDumper::new()),
            Box::new(MockAppServer::new()),
        );
        let err = provisioner.run(&request()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::SourceSchemaMissing(s) if s == "i2b2demodata"));
    }

    #[tokio::test]
    async fn test_database_container_not_running() {
        let mut runtime = MockRuntime::new();
        runtime.expect_list_running().returning(|| Ok(vec![]));

        let provisioner = Provisioner::new(
            sample_config(),
            Arc::new(runtime),
            Box::new(MockDbClientMock::new()),
            Box::new(MockDumper::new()),
            Box::new(MockAppServer::new()),
        );
        let err = provisioner.run(&request()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ContainerNotRunning(c) if c == "i2b2-pg"));
    }

    #[tokio::test]
    async fn test_recreate_drops_before_create() {
        let mut mocks = Mocks::ready();
        let mut seq = Sequence::new();
        mocks
            .db
            .expect_schema_exists()
            .withf(|s| s.as_str() == "i2b2prod")
            .returning(|_| Ok(true));
        mocks
            .db
            .expect_drop_schema()
            .withf(|s| s.as_str() == "i2b2prod")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mocks
            .db
            .expect_create_schema()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mocks
            .db
            .expect_upsert_role()
            .returning(|_, _| Ok(RoleAction::Updated));
        mocks
            .db
            .expect_reassign_ownership()
            .returning(|_, _| Ok(2));
        mocks.db.expect_grant_privileges().returning(|_, _| Ok(()));
        mocks.fresh_destination();

        let report = completed(
            mocks
                .provisioner()
                .run(&request().recreate(true))
                .await
                .unwrap(),
        );
        assert!(report.dropped_existing);
        assert_eq!(report.role_action, RoleAction::Updated);
    }

    #[tokio::test]
    async fn test_partial_destination_requires_recreate() {
        let mut mocks = Mocks::ready();
        mocks.db.expect_create_schema().returning(|_| Ok(()));
        mocks
            .db
            .expect_upsert_role()
            .returning(|_, _| Ok(RoleAction::Updated));
        mocks
            .db
            .expect_list_objects()
            .withf(|s| s.as_str() == "i2b2prod")
            .returning(|_| {
                let mut objects = SchemaObjects::default();
                objects.insert(ObjectKind::Table, "observation_fact");
                Ok(objects)
            });

        let err = mocks.provisioner().run(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::PartialClone {
                present: 1,
                expected: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_step_aborts_remaining_steps() {
        let mut mocks = Mocks::ready();
        mocks.db.expect_create_schema().returning(|_| Ok(()));
        mocks.db.expect_upsert_role().returning(|_, _| {
            Err(ProvisionError::Command {
                program: "psql".into(),
                code: "exit 3".into(),
                stderr: "ERROR:  permission denied to create role".into(),
            })
        });

        let err = mocks.provisioner().run(&request()).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("ERROR:  permission denied to create role"));
    }

    #[tokio::test]
    async fn test_clone_mismatch_is_fatal() {
        let mut mocks = Mocks::ready();
        mocks.db.expect_create_schema().returning(|_| Ok(()));
        mocks
            .db
            .expect_upsert_role()
            .returning(|_, _| Ok(RoleAction::Created));
        mocks
            .db
            .expect_reassign_ownership()
            .returning(|_, _| Ok(0));
        mocks
            .db
            .expect_list_objects()
            .withf(|s| s.as_str() == "i2b2prod")
            .returning(|_| Ok(SchemaObjects::default()));
        mocks
            .dumper
            .expect_dump_structure()
            .returning(|_| Ok(DUMP.to_string()));
        mocks.db.expect_apply_script().returning(|_| Ok(()));

        let err = mocks.provisioner().run(&request()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::CloneMismatch { missing, .. } if missing.len() == 2));
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let mut mocks = Mocks::ready();
        mocks
            .dumper
            .expect_dump_structure()
            .returning(|_| Ok(DUMP.to_string()));
        mocks
            .db
            .expect_schema_exists()
            .withf(|s| s.as_str() == "i2b2prod")
            .returning(|_| Ok(false));

        let outcome = mocks
            .provisioner()
            .run(&request().dry_run(true))
            .await
            .unwrap();
        match outcome {
            RunOutcome::DryRun {
                script,
                destination_exists,
                ..
            } => {
                assert!(!destination_exists);
                assert!(script.contains("ALTER TABLE i2b2prod.observation_fact OWNER TO \"i2b2app\""));
            }
            other => panic!("expected a dry run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repoint_updates_known_datasource() {
        let mut mocks = Mocks::ready();
        mocks.mutations_succeed();
        mocks.fresh_destination();
        mocks.app.expect_ensure_running().returning(|| Ok(()));
        mocks
            .app
            .expect_list_datasources()
            .returning(|| Ok(vec!["ExampleDS".into(), "QueryToolDemoDS".into()]));
        mocks
            .app
            .expect_set_datasource_credentials()
            .withf(|ds, user, password| {
                ds == "QueryToolDemoDS" && user == "i2b2app" && password.expose() == "s3cret"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks
            .app
            .expect_set_system_property()
            .withf(|name, value| name == "i2b2.crc.schema" && value == "i2b2prod")
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.app.expect_reload().times(1).returning(|| Ok(()));

        let report = completed(
            mocks
                .provisioner()
                .run(&request().repoint(true))
                .await
                .unwrap(),
        );
        assert_eq!(
            report.repoint,
            RepointOutcome::Repointed {
                datasources: vec!["QueryToolDemoDS".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_repoint_without_known_datasource_updates_property_only() {
        let mut mocks = Mocks::ready();
        mocks.mutations_succeed();
        mocks.fresh_destination();
        mocks.app.expect_ensure_running().returning(|| Ok(()));
        mocks
            .app
            .expect_list_datasources()
            .returning(|| Ok(vec!["ExampleDS".into(), "CustomCrcDS".into()]));
        mocks
            .app
            .expect_set_system_property()
            .times(1)
            .returning(|_, _| Ok(()));
        mocks.app.expect_reload().times(1).returning(|| Ok(()));

        let report = completed(
            mocks
                .provisioner()
                .run(&request().repoint(true))
                .await
                .unwrap(),
        );
        assert_eq!(
            report.repoint,
            RepointOutcome::PropertyOnly {
                discovered: vec!["ExampleDS".into(), "CustomCrcDS".into()]
            }
        );
        assert!(report.to_string().contains("ExampleDS, CustomCrcDS"));
    }

    #[tokio::test]
    async fn test_unreachable_app_server_fails_before_mutation() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_list_running()
            .returning(|| Ok(vec!["i2b2-pg".into()]));
        let mut db = MockDbClientMock::new();
        db.expect_is_ready().returning(|| Ok(()));
        db.expect_schema_exists().returning(|_| Ok(true));

        let provisioner = Provisioner::new(
            sample_config(),
            Arc::new(runtime),
            Box::new(db),
            Box::new(MockDumper::new()),
            Box::new(MockAppServer::new()),
        );
        let err = provisioner
            .run(&request().repoint(true))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AppServerUnavailable(_)));
    }
}
