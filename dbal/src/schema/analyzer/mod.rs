//! Database schema analyzer
//!
//! Reads the live catalog of one table into a [`TableState`]. Every dialect
//! reports types, defaults and constraint listings differently; the helpers
//! here fold those reports into the common model so the comparator can work
//! on both snapshots uniformly.

mod mysql;
mod oracle;
mod postgres;
mod sqlite;
mod sqlserver;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::db::driver::{Row, Value};
use crate::db::executor::Database;
use crate::dialect::{quoted_values, DialectKind, Handler, NativeColumn, ENUM_CONSTRAINT};
use crate::error::{Error, Result};
use crate::schema::types::{
    AbstractType, Column, DefaultValue, ForeignKey, ForeignKeyAction, Index, IndexColumn, TableState,
};

pub use mysql::MySqlAnalyzer;
pub use oracle::OracleAnalyzer;
pub use postgres::PostgresAnalyzer;
pub use sqlite::SqliteAnalyzer;
pub use sqlserver::SqlServerAnalyzer;

/// Schema analyzer trait
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Names of every user table visible to the connection
    async fn table_names(&self) -> Result<Vec<String>>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Columns in ordinal order
    async fn analyze_columns(&self, table: &str) -> Result<Vec<Column>>;

    /// Primary key columns in key order
    async fn analyze_primary_keys(&self, table: &str) -> Result<Vec<String>>;

    /// Secondary indexes; the primary key index is excluded
    async fn analyze_indexes(&self, table: &str) -> Result<Vec<Index>>;

    async fn analyze_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>>;

    /// Full snapshot of one table. A missing table is reported as a
    /// non-existent state, never as an error.
    async fn analyze_table(&self, table: &str) -> Result<TableState> {
        read_table(self, table)
            .await
            .map_err(|e| introspection_error(table, e))
    }
}

async fn read_table<A: Analyzer + ?Sized>(analyzer: &A, table: &str) -> Result<TableState> {
    let mut state = TableState::new(table);
    if !analyzer.table_exists(table).await? {
        debug!(table, "table does not exist");
        return Ok(state);
    }

    state.exists = true;
    state.columns = analyzer.analyze_columns(table).await?;
    state.primary_keys = analyzer.analyze_primary_keys(table).await?;
    state.indexes = analyzer.analyze_indexes(table).await?;
    state.foreign_keys = analyzer.analyze_foreign_keys(table).await?;

    debug!(
        table,
        columns = state.columns.len(),
        indexes = state.indexes.len(),
        foreign_keys = state.foreign_keys.len(),
        "analyzed table"
    );
    Ok(state)
}

fn introspection_error(table: &str, error: Error) -> Error {
    match error {
        Error::SchemaIntrospectionError { .. } => error,
        other => Error::introspection(table, other.to_string()),
    }
}

/// Schema analyzer for database schema introspection
pub struct SchemaAnalyzer<'a> {
    db: &'a Database,
}

impl<'a> SchemaAnalyzer<'a> {
    /// Create a new schema analyzer
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn analyzer(&self) -> Box<dyn Analyzer + 'a> {
        let db = self.db;
        match db.dialect() {
            DialectKind::MySql => Box::new(MySqlAnalyzer { db }),
            DialectKind::Postgres => Box::new(PostgresAnalyzer { db }),
            DialectKind::Sqlite => Box::new(SqliteAnalyzer { db }),
            DialectKind::SqlServer => Box::new(SqlServerAnalyzer { db }),
            DialectKind::Oracle => Box::new(OracleAnalyzer { db }),
        }
    }

    /// Analyze one table of the current database
    pub async fn analyze_table(&self, table: &str) -> Result<TableState> {
        self.analyzer().analyze_table(table).await
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.analyzer().table_names().await
    }
}

/// Assemble a column from the engine's report of it
pub(crate) fn build_column(
    handler: &dyn Handler,
    name: &str,
    native: &NativeColumn,
    nullable: bool,
    default: Option<DefaultValue>,
) -> Column {
    let ty = handler.abstract_type(native);
    let mut column = Column::new(name, ty);
    column.internal_type = native.full_type.clone();
    column.nullable = nullable;
    column.default = default;

    if ty.carries_size() {
        column.size = native.size.or(column.size);
    }
    if ty == AbstractType::Decimal {
        column.precision = native.precision;
        column.scale = native.scale.or(Some(0));
    }
    if ty.is_primary() {
        column.nullable = false;
        column.default = None;
    }
    column
}

/// A CHECK constraint restricting one column to a list of values
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EnumCheck {
    pub constraint: String,
    pub values: Vec<String>,
}

/// Mark an enum column with the values and name of its CHECK constraint
pub(crate) fn apply_enum_check(column: &mut Column, check: Option<&EnumCheck>) {
    if let Some(check) = check {
        if column.abstract_type == AbstractType::Enum {
            column.enum_values = check.values.clone();
            column
                .attributes
                .insert(ENUM_CONSTRAINT.to_string(), check.constraint.clone());
        }
    }
}

/// Enum checks keyed by column, from rows shaped
/// `(constraint_name, column_name, definition)`
pub(crate) fn enum_checks_from_rows(rows: &[Row]) -> HashMap<String, EnumCheck> {
    let mut checks = HashMap::new();
    for row in rows {
        let (Some(constraint), Some(column), Some(definition)) = (
            row.text("constraint_name"),
            row.text("column_name"),
            row.text("definition"),
        ) else {
            continue;
        };
        if let Some(values) = enum_values_of(&definition) {
            checks.insert(column, EnumCheck { constraint, values });
        }
    }
    checks
}

/// Values of an `IN (...)`, `= ANY (ARRAY[...])` or `= 'x' OR ...` check
pub(crate) fn enum_values_of(definition: &str) -> Option<Vec<String>> {
    static LIST_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(\bin\s*\(|=\s*any\s*\(|=\s*n?')").expect("valid enum check regex")
    });
    if !LIST_RE.is_match(definition) {
        return None;
    }
    let values = quoted_values(definition);
    (!values.is_empty()).then_some(values)
}

/// Group index rows shaped `(index_name, column_name, is_unique, is_descending)`
pub(crate) fn indexes_from_rows(table: &str, rows: &[Row]) -> Vec<Index> {
    let mut grouped: IndexMap<String, Index> = IndexMap::new();
    for row in rows {
        let (Some(name), Some(column)) = (row.text("index_name"), row.text("column_name")) else {
            continue;
        };
        let index = grouped
            .entry(name.clone())
            .or_insert_with(|| Index::new(table, &name, Vec::new(), row.flag("is_unique")));
        index.columns.push(if row.flag("is_descending") {
            IndexColumn::desc(&column)
        } else {
            IndexColumn::asc(&column)
        });
    }
    grouped.into_values().collect()
}

/// Group foreign key rows shaped `(constraint_name, column_name,
/// foreign_table, foreign_column, delete_rule, update_rule)`
pub(crate) fn foreign_keys_from_rows(table: &str, rows: &[Row]) -> Vec<ForeignKey> {
    let mut grouped: IndexMap<String, ForeignKey> = IndexMap::new();
    for row in rows {
        let (Some(name), Some(column), Some(foreign_table), Some(foreign_column)) = (
            row.text("constraint_name"),
            row.text("column_name"),
            row.text("foreign_table"),
            row.text("foreign_column"),
        ) else {
            continue;
        };
        let fk = grouped.entry(name.clone()).or_insert_with(|| ForeignKey {
            table: table.to_string(),
            name,
            columns: Vec::new(),
            foreign_table,
            foreign_columns: Vec::new(),
            on_delete: action(row, "delete_rule"),
            on_update: action(row, "update_rule"),
        });
        fk.columns.push(column);
        fk.foreign_columns.push(foreign_column);
    }
    grouped.into_values().collect()
}

fn action(row: &Row, column: &str) -> ForeignKeyAction {
    row.text(column)
        .map(|rule| ForeignKeyAction::parse(&rule))
        .unwrap_or_default()
}

/// First column of every row as text
pub(crate) fn names_from_rows(rows: &[Row], column: &str) -> Vec<String> {
    rows.iter().filter_map(|row| row.text(column)).collect()
}

pub(crate) fn size_of(row: &Row, column: &str) -> Option<u32> {
    row.int(column)
        .filter(|n| *n >= 0)
        .and_then(|n| u32::try_from(n).ok())
}

/// Fold an engine-reported default into the common model.
///
/// Strips wrapping parentheses (SQL Server) and trailing casts (Postgres
/// `'x'::character varying`); quoted text becomes a literal, bare numbers and
/// booleans become typed literals, sequence defaults vanish, and anything
/// else is kept as an expression.
pub(crate) fn parse_default(raw: Option<&str>) -> Option<DefaultValue> {
    let mut text = strip_parens(raw?.trim());
    loop {
        let stripped = strip_parens(strip_cast(text));
        if stripped == text {
            break;
        }
        text = stripped;
    }

    if text.is_empty() {
        return None;
    }
    if text.eq_ignore_ascii_case("null") {
        return Some(DefaultValue::Null);
    }
    if text.to_ascii_lowercase().starts_with("nextval(") {
        return None;
    }

    let unprefixed = match text.strip_prefix(|c: char| c == 'N' || c == 'n') {
        Some(rest) if rest.starts_with('\'') => rest,
        _ => text,
    };
    if let Some(literal) = unquote(unprefixed) {
        return Some(DefaultValue::literal(literal));
    }
    if let Ok(int) = text.parse::<i64>() {
        return Some(DefaultValue::literal(int));
    }
    if text.parse::<f64>().is_ok() {
        return Some(DefaultValue::literal(text));
    }
    match text.to_ascii_lowercase().as_str() {
        "true" => Some(DefaultValue::Literal(Value::Bool(true))),
        "false" => Some(DefaultValue::Literal(Value::Bool(false))),
        _ => Some(DefaultValue::expression(text)),
    }
}

/// Body of a single `'...'` literal, `None` if the text is anything else
pub(crate) fn unquote(text: &str) -> Option<String> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.replace("''", "").contains('\'') {
        return None;
    }
    Some(inner.replace("''", "'"))
}

fn strip_parens(mut text: &str) -> &str {
    while text.starts_with('(') && text.ends_with(')') && wraps_whole(text) {
        text = text[1..text.len() - 1].trim();
    }
    text
}

/// Whether the opening parenthesis closes at the last character
fn wraps_whole(text: &str) -> bool {
    let mut depth = 0usize;
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn strip_cast(text: &str) -> &str {
    static CAST_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"(?i)::\s*"?[a-z_][a-z0-9_ ."]*(\([0-9, ]*\))?(\[\])?$"#).expect("valid cast regex")
    });
    match CAST_RE.find(text) {
        Some(m) => text[..m.start()].trim_end(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("'abc'::character varying", DefaultValue::literal("abc"))]
    #[case("'it''s'", DefaultValue::literal("it's"))]
    #[case("((0))", DefaultValue::literal(0))]
    #[case("(N'hello')", DefaultValue::literal("hello"))]
    #[case("('')", DefaultValue::literal(""))]
    #[case("'{}'::jsonb", DefaultValue::literal("{}"))]
    #[case("NULL::character varying", DefaultValue::Null)]
    #[case("1.50", DefaultValue::literal("1.50"))]
    #[case("true", DefaultValue::Literal(Value::Bool(true)))]
    #[case("CURRENT_TIMESTAMP", DefaultValue::expression("CURRENT_TIMESTAMP"))]
    #[case("(getdate())", DefaultValue::expression("getdate()"))]
    #[case("now()", DefaultValue::expression("now()"))]
    #[case("'2020-01-01'::date", DefaultValue::literal("2020-01-01"))]
    fn parses_engine_defaults(#[case] raw: &str, #[case] expected: DefaultValue) {
        assert_eq!(parse_default(Some(raw)), Some(expected));
    }

    #[test]
    fn sequence_defaults_are_dropped() {
        assert_eq!(parse_default(Some("nextval('users_id_seq'::regclass)")), None);
        assert_eq!(parse_default(None), None);
    }

    #[test]
    fn parentheses_are_only_stripped_when_wrapping() {
        assert_eq!(
            parse_default(Some("(1) + (2)")),
            Some(DefaultValue::expression("(1) + (2)"))
        );
    }

    #[rstest]
    #[case("CHECK (\"status\" IN ('a', 'b'))", Some(vec!["a", "b"]))]
    #[case(
        "CHECK (((status)::text = ANY ((ARRAY['a'::character varying, 'b'::character varying])::text[])))",
        Some(vec!["a", "b"])
    )]
    #[case("([status]='b' OR [status]='a')", Some(vec!["b", "a"]))]
    #[case("\"STATUS\" IS NOT NULL", None)]
    #[case("CHECK (price > 0)", None)]
    fn recognises_enum_checks(#[case] definition: &str, #[case] expected: Option<Vec<&str>>) {
        let expected = expected.map(|v| v.into_iter().map(String::from).collect::<Vec<_>>());
        assert_eq!(enum_values_of(definition), expected);
    }

    #[test]
    fn groups_index_rows_in_order() {
        let rows = vec![
            Row::from_pairs([
                ("index_name", Value::from("idx_ab")),
                ("column_name", "a".into()),
                ("is_unique", Value::Int(1)),
                ("is_descending", Value::Int(0)),
            ]),
            Row::from_pairs([
                ("index_name", Value::from("idx_ab")),
                ("column_name", "b".into()),
                ("is_unique", Value::Int(1)),
                ("is_descending", Value::Int(1)),
            ]),
        ];
        let indexes = indexes_from_rows("t", &rows);
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].columns, vec![IndexColumn::asc("a"), IndexColumn::desc("b")]);
    }

    #[test]
    fn groups_foreign_key_rows() {
        let row = |column: &str, foreign: &str| {
            Row::from_pairs([
                ("constraint_name", Value::from("fk_ab")),
                ("column_name", column.into()),
                ("foreign_table", "parents".into()),
                ("foreign_column", foreign.into()),
                ("delete_rule", "CASCADE".into()),
                ("update_rule", "NO_ACTION".into()),
            ])
        };
        let fks = foreign_keys_from_rows("children", &[row("a", "x"), row("b", "y")]);
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, vec!["a", "b"]);
        assert_eq!(fks[0].foreign_columns, vec!["x", "y"]);
        assert_eq!(fks[0].on_delete, ForeignKeyAction::Cascade);
        assert_eq!(fks[0].on_update, ForeignKeyAction::NoAction);
    }
}
