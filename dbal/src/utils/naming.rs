//! Identifier utilities
//!
//! Quoting, schema-qualified name handling, and the deterministic names the
//! schema API gives to indexes and constraints it creates.

use crate::dialect::DialectKind;

/// Split `schema.table` into its parts
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}

/// Last segment of a possibly qualified name
pub fn unqualified(name: &str) -> &str {
    split_qualified(name).1
}

/// Qualify `name` with the schema of `table`, if it has one
pub fn sibling_name(table: &str, name: &str) -> String {
    match split_qualified(table).0 {
        Some(schema) if !name.contains('.') => format!("{}.{}", schema, name),
        _ => name.to_string(),
    }
}

/// Quote every segment of a dotted name, doubling embedded close quotes
pub fn quote_identifier(name: &str, open: char, close: char) -> String {
    name.split('.')
        .map(|part| {
            let escaped = part.replace(close, &format!("{}{}", close, close));
            format!("{}{}{}", open, escaped, close)
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Sanitize identifiers for SQL
pub fn sanitize_identifier(name: &str) -> String {
    let mut sanitized = name.replace(|c: char| !c.is_alphanumeric() && c != '_', "_");

    if sanitized.chars().next().map_or(false, |c| c.is_numeric()) {
        sanitized = format!("_{}", sanitized);
    }

    sanitized
}

/// Truncate an identifier to fit database limits
pub fn truncate_identifier(name: &str, max_length: usize) -> String {
    if name.len() <= max_length || max_length <= 9 {
        name.to_string()
    } else {
        // Keep room for "_" plus an 8 character hash of the full name
        let keep_length = max_length - 9;
        let hash = format!("{:x}", md5::compute(name.as_bytes()));
        let mut cut = keep_length;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}_{}", &name[..cut], &hash[0..8])
    }
}

/// Get maximum identifier length for specific database
pub fn max_identifier_length(dialect: DialectKind) -> usize {
    match dialect {
        DialectKind::Postgres => 63,
        DialectKind::MySql => 64,
        DialectKind::Sqlite => 2048,
        DialectKind::Oracle => 128,
        DialectKind::SqlServer => 128,
    }
}

fn base(table: &str) -> String {
    sanitize_identifier(unqualified(table))
}

/// Deterministic index name: `<table>_index_<columns>_<hash>`, cut to the
/// dialect's identifier limit
///
/// The hash keeps names unique when column lists collide after sanitising.
pub fn index_name(dialect: DialectKind, table: &str, columns: &[String]) -> String {
    let joined = columns
        .iter()
        .map(|c| sanitize_identifier(c))
        .collect::<Vec<_>>()
        .join("_");
    let hash = format!("{:x}", md5::compute(format!("{}:{}", table, columns.join(","))));
    truncate_identifier(
        &format!("{}_index_{}_{}", base(table), joined, &hash[..8]),
        max_identifier_length(dialect),
    )
}

/// Deterministic foreign key name: `<table>_<columns>_fk`
pub fn foreign_key_name(dialect: DialectKind, table: &str, columns: &[String]) -> String {
    let joined = columns
        .iter()
        .map(|c| sanitize_identifier(c))
        .collect::<Vec<_>>()
        .join("_");
    truncate_identifier(&format!("{}_{}_fk", base(table), joined), max_identifier_length(dialect))
}

/// Name of the CHECK constraint emulating an enum column
pub fn enum_constraint_name(dialect: DialectKind, table: &str, column: &str) -> String {
    truncate_identifier(
        &format!("{}_{}_enum", base(table), sanitize_identifier(column)),
        max_identifier_length(dialect),
    )
}

/// Name of a SQL Server default constraint
pub fn default_constraint_name(table: &str, column: &str) -> String {
    truncate_identifier(
        &format!("{}_{}_default", base(table), sanitize_identifier(column)),
        max_identifier_length(DialectKind::SqlServer),
    )
}

/// Shadow table used while rebuilding a table
pub fn shadow_table_name(table: &str) -> String {
    sibling_name(table, &format!("{}__shadow", unqualified(table)))
}
