use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::errors::ProvisionError;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex"));

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A schema or role name that is safe to embed as a quoted SQL identifier.
///
/// Only lower-case ASCII letters, digits and underscores are accepted, so the quoted
/// and unquoted spellings of a name always refer to the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(value: &str) -> Result<Self, ProvisionError> {
        let invalid = |reason: &str| ProvisionError::InvalidIdentifier {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if value.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid("longer than 63 bytes"));
        }
        if !IDENTIFIER.is_match(value) {
            return Err(invalid(
                "only lower-case letters, digits and '_' are allowed, and it must not start with a digit",
            ));
        }
        if value.starts_with("pg_") {
            return Err(invalid("the pg_ prefix is reserved for system objects"));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for direct embedding into SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A password. It is never printed, logged or serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Result<Self, ProvisionError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ProvisionError::Usage("password must not be empty".into()));
        }
        if value.contains('\0') {
            return Err(ProvisionError::Usage(
                "password must not contain NUL bytes".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        for name in ["i2b2prod", "crc_data", "_staging", "a1"] {
            assert_eq!(Identifier::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_rejects_injection_attempts() {
        for name in [
            "",
            "Prod",
            "1schema",
            "prod; DROP SCHEMA public",
            "prod\"",
            "pro-d",
            "pg_catalog",
        ] {
            assert!(
                matches!(
                    Identifier::parse(name),
                    Err(ProvisionError::InvalidIdentifier { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_length_limit() {
        let max = "a".repeat(MAX_IDENTIFIER_LEN);
        assert!(Identifier::parse(&max).is_ok());
        assert!(Identifier::parse(&format!("{max}a")).is_err());
    }

    #[test]
    fn test_quoted() {
        let id = Identifier::parse("i2b2prod").unwrap();
        assert_eq!(id.quoted(), "\"i2b2prod\"");
        assert_eq!(id.to_string(), "i2b2prod");
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("s3cr'et").unwrap();
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.expose(), "s3cr'et");
        assert!(Secret::new("").is_err());
    }
}
