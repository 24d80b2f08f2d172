//! Identifier and literal quoting.
//!
//! The quoting algorithm follows libpq's `PQescapeStringInternal` for
//! literals and the behavior of `quote_ident()` for identifiers, with one
//! deliberate difference: identifiers that are keywords are always quoted,
//! even when PostgreSQL would accept them bare in some positions.

use super::keywords::is_keyword;

/// Quote an identifier (the name of a table, column, function, type, schema,
/// and so on) for use in a DDL statement.
///
/// The identifier is returned verbatim unless it:
///
/// - contains an upper-case character,
/// - contains a double quote or a hyphen,
/// - is a PostgreSQL keyword that requires quoting in some context.
///
/// A dotted identifier (`schema.name`) is split and each part is quoted
/// independently.
pub fn quote_identifier(raw: &str) -> String {
    raw.split('.')
        .map(quote_part)
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a two-part `schema.name` identifier without splitting either part on
/// embedded dots.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_part(schema), quote_part(name))
}

fn quote_part(identifier: &str) -> String {
    if requires_quoting(identifier) {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    } else {
        identifier.to_string()
    }
}

fn requires_quoting(identifier: &str) -> bool {
    let lowered = identifier.to_lowercase();
    lowered != identifier
        || is_keyword(&lowered)
        || lowered.contains('"')
        || lowered.contains('-')
}

/// Quote a string literal for splicing into a statement that does not accept
/// parameters (DDL, COMMENT ON, and similar).
///
/// Single quotes are doubled. If the literal contains a backslash, the
/// backslashes are doubled as well and the string is emitted in PostgreSQL's
/// C-style escape form (` E'...'`, with the leading space libpq uses).
pub fn quote_literal(literal: &str) -> String {
    let escaped = literal.replace('\'', "''");
    if escaped.contains('\\') {
        format!(" E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

/// Split a possibly schema-qualified table name at the first dot.
///
/// A bare name gets the `public` schema. A leading dot yields an empty
/// schema, which callers treat as "no schema to create".
pub fn parse_table_name(name: &str) -> (String, String) {
    match name.split_once('.') {
        None => ("public".to_string(), name.to_string()),
        Some((schema, rest)) => (schema.to_string(), rest.to_string()),
    }
}
