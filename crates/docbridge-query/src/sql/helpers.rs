//! Identifier quoting and validation for the relational dialect.

use bson::Bson;
use unicode_normalization::UnicodeNormalization;

use crate::Result;
use docbridge_common::BridgeError;

const SQL_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter",
    "truncate", "grant", "revoke", "exec", "execute", "union", "declare",
    "table", "index", "view", "schema", "database", "user", "role",
    "from", "where", "join", "inner", "outer", "left", "right",
    "on", "using", "and", "or", "not", "in", "exists", "between",
    "like", "ilike", "is", "null", "true", "false", "case", "when",
    "then", "else", "end", "as", "order", "by", "group", "having",
    "limit", "offset", "distinct", "all", "any", "some",
];

/// Quotes a SQL identifier.
///
/// Handles schema-qualified names by quoting each part separately. Parts are
/// emitted in the NFKC form that [`validate_identifier_part`] checks.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.nfkc().collect::<String>()))
        .collect::<Vec<_>>()
        .join(".")
}

/// Validates a table or column name, optionally schema-qualified.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BridgeError::Constraint("Identifier cannot be empty".to_string()));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(BridgeError::Constraint(format!(
            "Invalid schema-qualified identifier '{}': must be in format 'schema.table'",
            name
        )));
    }

    parts.into_iter().try_for_each(validate_identifier_part)
}

/// Validates a single part of an identifier (no dots allowed).
pub fn validate_identifier_part(name: &str) -> Result<()> {
    // NFKC folds look-alike characters before the ASCII checks
    let name = name.nfkc().collect::<String>();

    if name.len() > 63 {
        return Err(BridgeError::Constraint(format!(
            "Identifier '{}' exceeds maximum length of 63",
            name
        )));
    }

    let first_char = name.chars().next().ok_or_else(|| {
        BridgeError::Constraint("Identifier part cannot be empty".to_string())
    })?;
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(BridgeError::Constraint(format!(
            "Identifier '{}' must start with a letter or underscore",
            name
        )));
    }

    if let Some(ch) = name.chars().find(|ch| !ch.is_ascii_alphanumeric() && *ch != '_') {
        return Err(BridgeError::Constraint(format!(
            "Identifier '{}' contains invalid character '{}'",
            name, ch
        )));
    }

    let name_lower = name.to_lowercase();
    if name_lower.starts_with("pg_") || name_lower == "information_schema" {
        return Err(BridgeError::Constraint(format!(
            "Access to system catalog '{}' is not allowed",
            name
        )));
    }

    if SQL_KEYWORDS.contains(&name_lower.as_str()) {
        return Err(BridgeError::Constraint(format!(
            "Identifier '{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}

/// Push a bound parameter and return its placeholder.
pub fn bind(params: &mut Vec<Bson>, value: Bson) -> String {
    params.push(value);
    format!("${}", params.len())
}
