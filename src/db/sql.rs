//! Statement text shared by the database clients.
//!
//! Identifiers arrive pre-validated and are embedded quoted. Values that must be
//! literals (names looked up in the catalog, the password) are never embedded; the
//! builders take a placeholder instead, `$1` for a bound parameter or `:'name'` for a
//! psql variable.

use crate::models::identifier::Identifier;

pub fn drop_schema(schema: &Identifier) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", schema.quoted())
}

pub fn create_schema(schema: &Identifier) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted())
}

pub fn schema_exists(schema: &str) -> String {
    format!("SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = {schema})")
}

pub fn role_exists(role: &str) -> String {
    format!("SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = {role})")
}

/// A query whose single result is the `CREATE ROLE` or `ALTER ROLE` statement to run.
///
/// `format()` quotes the role with `%I` and the password with `%L` on the server, so the
/// password only ever travels as a parameter.
pub fn role_statement(exists: bool, role: &str, password: &str) -> String {
    let verb = if exists { "ALTER" } else { "CREATE" };
    format!("SELECT format('{verb} ROLE %I WITH LOGIN PASSWORD %L', {role}::text, {password}::text)")
}

const TRACKED_RELKINDS: &str = "('r', 'p', 'S', 'v', 'm', 'f')";

pub fn list_objects(schema: &str) -> String {
    format!(
        "SELECT c.relkind::text AS relkind, c.relname::text AS relname \
         FROM pg_catalog.pg_class c \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = {schema} AND c.relkind IN {TRACKED_RELKINDS} \
         ORDER BY c.relname"
    )
}

/// A query returning one `ALTER ... OWNER TO` statement per relation in `schema` not yet
/// owned by `role`.
///
/// Sequences linked to a column (serial or identity) are skipped: they follow their
/// table's owner and cannot be re-owned on their own.
pub fn ownership_statements(schema: &str, role: &str) -> String {
    format!(
        "SELECT format('ALTER %s %I.%I OWNER TO %I', \
             CASE c.relkind \
                 WHEN 'S' THEN 'SEQUENCE' \
                 WHEN 'v' THEN 'VIEW' \
                 WHEN 'm' THEN 'MATERIALIZED VIEW' \
                 WHEN 'f' THEN 'FOREIGN TABLE' \
                 ELSE 'TABLE' END, \
             n.nspname, c.relname, {role}::text) \
         FROM pg_catalog.pg_class c \
         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = {schema} \
           AND c.relkind IN {TRACKED_RELKINDS} \
           AND pg_catalog.pg_get_userbyid(c.relowner) <> {role} \
           AND NOT (c.relkind = 'S' AND EXISTS ( \
               SELECT 1 FROM pg_catalog.pg_depend d \
               WHERE d.classid = 'pg_catalog.pg_class'::regclass \
                 AND d.objid = c.oid AND d.deptype IN ('a', 'i'))) \
         ORDER BY c.relkind = 'S', c.relname"
    )
}

/// Schema usage, CRUD on tables, usage on sequences, now and for future objects.
pub fn grant_privileges(schema: &Identifier, role: &Identifier) -> Vec<String> {
    let (schema, role) = (schema.quoted(), role.quoted());
    vec![
        format!("GRANT USAGE ON SCHEMA {schema} TO {role}"),
        format!("GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {schema} TO {role}"),
        format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {schema} TO {role}"),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} \
             GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {role}"
        ),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} \
             GRANT USAGE, SELECT ON SEQUENCES TO {role}"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identifier {
        Identifier::parse(name).unwrap()
    }

    #[test]
    fn test_schema_statements_quote_identifiers() {
        assert_eq!(
            drop_schema(&id("i2b2prod")),
            "DROP SCHEMA IF EXISTS \"i2b2prod\" CASCADE"
        );
        assert_eq!(
            create_schema(&id("i2b2prod")),
            "CREATE SCHEMA IF NOT EXISTS \"i2b2prod\""
        );
    }

    #[test]
    fn test_role_statement_uses_placeholders() {
        assert_eq!(
            role_statement(false, "$1", "$2"),
            "SELECT format('CREATE ROLE %I WITH LOGIN PASSWORD %L', $1::text, $2::text)"
        );
        assert_eq!(
            role_statement(true, ":'role'", ":'password'"),
            "SELECT format('ALTER ROLE %I WITH LOGIN PASSWORD %L', :'role'::text, :'password'::text)"
        );
    }

    #[test]
    fn test_grants_cover_present_and_future_objects() {
        let grants = grant_privileges(&id("i2b2prod"), &id("i2b2app"));
        assert_eq!(grants.len(), 5);
        assert!(grants
            .iter()
            .all(|g| g.contains("\"i2b2prod\"") && g.ends_with("TO \"i2b2app\"")));
        assert_eq!(
            grants
                .iter()
                .filter(|g| g.starts_with("ALTER DEFAULT PRIVILEGES"))
                .count(),
            2
        );
    }

    #[test]
    fn test_catalog_queries_take_placeholders() {
        assert!(schema_exists("$1").ends_with("nspname = $1)"));
        assert!(list_objects(":'schema'").contains("n.nspname = :'schema'"));
        let ownership = ownership_statements("$1", "$2");
        assert!(ownership.contains("n.nspname = $1"));
        assert!(ownership.contains("pg_get_userbyid(c.relowner) <> $2"));
    }
}
