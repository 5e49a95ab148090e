//! Structure cloning by rewriting a schema-only dump.
//!
//! A dump of the source schema is split into statements and run through an ordered
//! list of [`Rule`]s. Each rule may keep, rewrite or drop a statement. The result is a
//! script that creates the same objects under the destination schema, owned by the
//! application role, without the source's schema-level statements or privileges.

mod splitter;

use std::{collections::BTreeMap, sync::LazyLock};

use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

use crate::{errors::ProvisionError, models::identifier::Identifier};

pub use splitter::{split_statements, Statement};

/// A single textual transformation applied to every statement of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Drop psql backslash commands (`\connect`, `\restrict`, ...).
    StripMetaCommands,
    /// Drop `CREATE`/`ALTER`/`COMMENT ON SCHEMA` for the source schema.
    StripSchemaStatements,
    /// Drop `GRANT`, `REVOKE` and `ALTER DEFAULT PRIVILEGES`.
    StripPrivileges,
    /// Replace every whole-word occurrence of the source schema name.
    RenameSchema,
    /// Make `search_path` settings name the destination schema.
    RewriteSearchPath,
    /// Make `ALTER ... OWNER TO` name the application role.
    RewriteOwner,
}

impl Rule {
    pub const DEFAULT: [Rule; 6] = [
        Rule::StripMetaCommands,
        Rule::StripSchemaStatements,
        Rule::StripPrivileges,
        Rule::RenameSchema,
        Rule::RewriteSearchPath,
        Rule::RewriteOwner,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Rule::StripMetaCommands => "strip-meta-commands",
            Rule::StripSchemaStatements => "strip-schema-statements",
            Rule::StripPrivileges => "strip-privileges",
            Rule::RenameSchema => "rename-schema",
            Rule::RewriteSearchPath => "rewrite-search-path",
            Rule::RewriteOwner => "rewrite-owner",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleCount {
    pub dropped: usize,
    pub rewritten: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Statements in the input, not counting comment-only chunks.
    pub statements: usize,
    /// Statements left in the output.
    pub applied: usize,
    pub dropped: usize,
    /// Output statements changed by at least one rule.
    pub rewritten: usize,
    pub rules: BTreeMap<String, RuleCount>,
}

#[derive(Debug, Clone)]
pub struct Transformed {
    pub script: String,
    pub stats: TransformStats,
}

enum Outcome {
    Unchanged,
    Rewritten(String),
    Dropped,
}

static PRIVILEGE_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(GRANT|REVOKE|ALTER\s+DEFAULT\s+PRIVILEGES)\b").expect("valid regex")
});
static SET_SEARCH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^SET\s+(?:SESSION\s+|LOCAL\s+)?search_path\s*(?:=|TO)\s*[^;]*")
        .expect("valid regex")
});
static SET_CONFIG_SEARCH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(set_config\(\s*'search_path'\s*,\s*)'(?:[^']|'')*'").expect("valid regex")
});
static OWNER_TO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bOWNER\s+TO\s+(?:"(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*)"#)
        .expect("valid regex")
});
static ALTER_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ALTER\s").expect("valid regex"));

/// The rewrite from one source schema to one destination schema and owner.
#[derive(Debug, Clone)]
pub struct SchemaTransform {
    destination: Identifier,
    owner: Identifier,
    rules: Vec<Rule>,
    schema_statement: Regex,
    source_word: Regex,
}

impl SchemaTransform {
    pub fn new(
        source: &Identifier,
        destination: &Identifier,
        owner: &Identifier,
    ) -> Result<Self, ProvisionError> {
        let source = regex::escape(source.as_str());
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| ProvisionError::Config(e.to_string()))
        };

        Ok(Self {
            destination: destination.clone(),
            owner: owner.clone(),
            rules: Rule::DEFAULT.to_vec(),
            schema_statement: compile(format!(
                r#"(?is)^(?:CREATE\s+SCHEMA(?:\s+IF\s+NOT\s+EXISTS)?|ALTER\s+SCHEMA|COMMENT\s+ON\s+SCHEMA|DROP\s+SCHEMA(?:\s+IF\s+EXISTS)?)\s+"?{source}"?(?:\s|;|$)"#
            ))?,
            source_word: compile(format!(r"\b{source}\b"))?,
        })
    }

    pub fn with_rules(mut self, rules: &[Rule]) -> Self {
        self.rules = rules.to_vec();
        self
    }

    pub fn apply(&self, script: &str) -> Transformed {
        let mut stats = TransformStats::default();
        let mut output = String::with_capacity(script.len());

        for statement in split_statements(script) {
            if statement.is_trivia() {
                output.push_str(&statement.text);
                continue;
            }
            stats.statements += 1;

            let mut text = statement.text;
            let mut changed = false;
            let mut dropped = false;
            for rule in &self.rules {
                let count = stats.rules.entry(rule.name().to_string()).or_default();
                match self.apply_rule(*rule, &text) {
                    Outcome::Unchanged => {}
                    Outcome::Rewritten(rewritten) => {
                        count.rewritten += 1;
                        changed = true;
                        text = rewritten;
                    }
                    Outcome::Dropped => {
                        count.dropped += 1;
                        dropped = true;
                        break;
                    }
                }
            }

            if dropped {
                stats.dropped += 1;
                continue;
            }
            if changed {
                stats.rewritten += 1;
            }
            stats.applied += 1;
            output.push_str(&text);
        }

        Transformed {
            script: output,
            stats,
        }
    }

    fn apply_rule(&self, rule: Rule, text: &str) -> Outcome {
        let statement = Statement::new(text);
        let head = statement.head();

        match rule {
            Rule::StripMetaCommands if statement.is_meta_command() => Outcome::Dropped,
            Rule::StripSchemaStatements if self.schema_statement.is_match(head) => {
                Outcome::Dropped
            }
            Rule::StripPrivileges if PRIVILEGE_STATEMENT.is_match(head) => Outcome::Dropped,
            Rule::RenameSchema => rewritten(
                text,
                self.source_word
                    .replace_all(text, NoExpand(self.destination.as_str()))
                    .into_owned(),
            ),
            Rule::RewriteSearchPath => {
                let path = format!("{}, pg_catalog", self.destination.quoted());
                let prefix = &text[..text.len() - head.len()];
                let head = SET_SEARCH_PATH
                    .replace(head, NoExpand(&format!("SET search_path = {path}")))
                    .into_owned();
                let head = SET_CONFIG_SEARCH_PATH
                    .replace_all(&head, |caps: &regex::Captures| {
                        format!("{}'{}'", &caps[1], path.replace('\'', "''"))
                    })
                    .into_owned();
                rewritten(text, format!("{prefix}{head}"))
            }
            Rule::RewriteOwner if ALTER_STATEMENT.is_match(head) => rewritten(
                text,
                OWNER_TO
                    .replace_all(text, NoExpand(&format!("OWNER TO {}", self.owner.quoted())))
                    .into_owned(),
            ),
            _ => Outcome::Unchanged,
        }
    }
}

fn rewritten(before: &str, after: String) -> Outcome {
    if before == after {
        Outcome::Unchanged
    } else {
        Outcome::Rewritten(after)
    }
}
