//! Dialect handlers
//!
//! One [`Handler`] per engine renders abstract change-set operations into
//! native DDL. The trait carries ANSI-flavoured defaults; each dialect
//! overrides what its engine does differently. Handlers are stateless and
//! resolved once per connection through [`DialectKind::handler`].

pub mod mysql;
pub mod oracle;
pub mod postgres;
pub mod sqlite;
pub mod sqlserver;

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::db::driver::{Statement, Value};
use crate::error::{Error, Result};
use crate::schema::compare::{ColumnAttribute, ComparePolicy};
use crate::schema::diff::Operation;
use crate::schema::types::{
    AbstractType, Column, DefaultValue, ForeignKey, ForeignKeyAction, Index, TableState,
};
use crate::utils::naming;

pub use mysql::MySqlHandler;
pub use oracle::OracleHandler;
pub use postgres::PostgresHandler;
pub use sqlite::SqliteHandler;
pub use sqlserver::SqlServerHandler;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    MySql,
    Postgres,
    Sqlite,
    SqlServer,
    Oracle,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::MySql => "mysql",
            DialectKind::Postgres => "postgres",
            DialectKind::Sqlite => "sqlite",
            DialectKind::SqlServer => "sqlserver",
            DialectKind::Oracle => "oracle",
        }
    }

    /// The handler for this dialect
    pub fn handler(&self) -> &'static dyn Handler {
        static MYSQL: MySqlHandler = MySqlHandler;
        static POSTGRES: PostgresHandler = PostgresHandler;
        static SQLITE: SqliteHandler = SqliteHandler;
        static SQLSERVER: SqlServerHandler = SqlServerHandler;
        static ORACLE: OracleHandler = OracleHandler;

        match self {
            DialectKind::MySql => &MYSQL,
            DialectKind::Postgres => &POSTGRES,
            DialectKind::Sqlite => &SQLITE,
            DialectKind::SqlServer => &SQLSERVER,
            DialectKind::Oracle => &ORACLE,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DialectKind::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(DialectKind::Postgres),
            "sqlite" => Ok(DialectKind::Sqlite),
            "sqlserver" | "mssql" => Ok(DialectKind::SqlServer),
            "oracle" => Ok(DialectKind::Oracle),
            other => Err(Error::ConfigError(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }
}

/// Engine-reported column shape, input to the reverse type map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeColumn {
    /// Lower-cased base type name without arguments, e.g. `varchar`
    pub data_type: String,
    /// Full type as reported, e.g. `tinyint(1)` or `enum('a','b')`
    pub full_type: String,
    pub size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub auto_increment: bool,
    /// A `CHECK (col IN (...))` constraint restricts the column
    pub has_enum_check: bool,
}

impl NativeColumn {
    /// Split a declared type such as `numeric(10, 2)` into its parts
    pub fn parse(full_type: &str) -> Self {
        let full = full_type.trim().to_ascii_lowercase();
        let mut native = NativeColumn {
            full_type: full.clone(),
            ..Default::default()
        };

        let (Some(open), Some(close)) = (full.find('('), full.find(')')) else {
            native.data_type = full.split_whitespace().collect::<Vec<_>>().join(" ");
            return native;
        };
        if close < open {
            native.data_type = full;
            return native;
        }

        let base = full[..open].trim();
        let tail = full[close + 1..].trim();
        native.data_type = if tail.is_empty() {
            base.to_string()
        } else {
            format!("{} {}", base, tail)
        };

        let mut args = full[open + 1..close].split(',').map(|a| a.trim().parse::<u32>().ok());
        let first = args.next().flatten();
        let second = args.next().flatten();
        native.size = first;
        native.precision = first;
        native.scale = second;
        native
    }
}

/// One unit of work inside a table apply
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Rendered natively, one operation at a time
    Operation(Operation),
    /// Several operations folded into one whole-table rebuild
    Rebuild(Vec<Operation>),
}

impl Step {
    pub fn operations(&self) -> Vec<&Operation> {
        match self {
            Step::Operation(op) => vec![op],
            Step::Rebuild(ops) => ops.iter().collect(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Step::Operation(op) => op.describe(),
            Step::Rebuild(ops) => format!("rebuild ({} operations)", ops.len()),
        }
    }
}

/// Per-engine DDL renderer
pub trait Handler: Send + Sync {
    fn kind(&self) -> DialectKind;

    /// Opening and closing identifier quote characters
    fn identifier_quote(&self) -> (char, char) {
        ('"', '"')
    }

    /// Quote a possibly schema-qualified identifier
    fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.identifier_quote();
        naming::quote_identifier(name, open, close)
    }

    fn quote_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    /// Positional bind placeholder, 1-based
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn compare_policy(&self) -> ComparePolicy {
        ComparePolicy::default()
    }

    // ---- type maps ----

    /// Native type for an abstract column, arguments included
    fn native_type(&self, column: &Column) -> String;

    /// Reverse type map used by the introspector
    fn abstract_type(&self, native: &NativeColumn) -> AbstractType;

    /// Fold a declared column into what this engine will report back
    fn normalize_declared(&self, column: &mut Column) {
        standard_normalize(self, column)
    }

    /// Fold referential actions the engine does not support
    fn normalize_foreign_key(&self, _fk: &mut ForeignKey) {}

    // ---- policies ----

    /// Drop and restore indexes over a column changing in these ways
    fn backs_up_indexes(&self, changes: &[ColumnAttribute]) -> bool {
        changes.iter().any(ColumnAttribute::is_structural)
    }

    /// Drop and restore foreign keys over a column changing in these ways
    fn backs_up_foreign_keys(&self, changes: &[ColumnAttribute]) -> bool {
        changes.iter().any(ColumnAttribute::is_structural)
    }

    /// Whether backed-up indexes and foreign keys are recreated after the alteration
    fn restores_dependencies(&self) -> bool {
        true
    }

    /// Reject transitions the engine cannot express
    fn check_alteration(&self, _table: &str, _from: &Column, _to: &Column) -> Result<()> {
        Ok(())
    }

    /// Pre-flight validation of a column definition
    fn validate_column(&self, _table: &str, _column: &Column) -> Result<()> {
        Ok(())
    }

    fn validate(&self, table: &str, operation: &Operation) -> Result<()> {
        match operation {
            Operation::CreateTable(state) => state
                .columns
                .iter()
                .try_for_each(|column| self.validate_column(table, column)),
            Operation::AddColumn(column) => self.validate_column(table, column),
            Operation::AlterColumn { from, to } => {
                self.check_alteration(table, from, to)?;
                self.validate_column(table, to)
            }
            _ => Ok(()),
        }
    }

    // ---- column fragments ----

    fn render_bool(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn render_literal(&self, ty: AbstractType, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.render_bool(*b).to_string(),
            other if ty == AbstractType::Boolean => match other.as_bool() {
                Some(b) => self.render_bool(b).to_string(),
                None => self.quote_literal(&other.as_text().unwrap_or_default()),
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            other => {
                let text = other.as_text().unwrap_or_default();
                if ty.is_numeric() && text.trim().parse::<f64>().is_ok() {
                    text.trim().to_string()
                } else {
                    self.quote_literal(&text)
                }
            }
        }
    }

    /// Rendered `DEFAULT` operand, `None` when the column has no default
    fn render_default(&self, column: &Column) -> Option<String> {
        match column.default.as_ref()? {
            DefaultValue::Null => Some("NULL".to_string()),
            DefaultValue::Expression(sql) => Some(sql.clone()),
            DefaultValue::Literal(value) => Some(self.render_literal(column.abstract_type, value)),
        }
    }

    /// `CHECK` constraint emulating an enum, for dialects without native enums
    fn enum_check(&self, table: &str, column: &Column) -> Option<String> {
        if column.abstract_type != AbstractType::Enum || column.enum_values.is_empty() {
            return None;
        }
        Some(format!(
            "CONSTRAINT {} CHECK ({} IN ({}))",
            self.quote_identifier(&enum_constraint(self.kind(), table, column)),
            self.quote_identifier(&column.name),
            self.enum_list(&column.enum_values)
        ))
    }

    fn enum_list(&self, values: &[String]) -> String {
        values
            .iter()
            .map(|v| self.quote_literal(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Full column definition as used by CREATE TABLE and ADD COLUMN
    fn column_definition(&self, table: &str, column: &Column) -> String {
        standard_column_definition(self, table, column)
    }

    /// Primary key declared inline on the column (SQLite rowid alias)
    fn inline_primary_key(&self, _table: &TableState) -> bool {
        false
    }

    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
        let mut clause = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.quote_list(&fk.columns),
            self.quote_identifier(&fk.foreign_table),
            self.quote_list(&fk.foreign_columns)
        );
        clause.push_str(&self.referential_actions(fk));
        clause
    }

    fn referential_actions(&self, fk: &ForeignKey) -> String {
        format!(
            " ON DELETE {} ON UPDATE {}",
            fk.on_delete.as_sql(),
            fk.on_update.as_sql()
        )
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ---- whole-table statements ----

    fn render_create_table(&self, table: &TableState) -> Result<Vec<Statement>> {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(&table.name, c))
            .collect();
        if !table.primary_keys.is_empty() && !self.inline_primary_key(table) {
            lines.push(format!("PRIMARY KEY ({})", self.quote_list(&table.primary_keys)));
        }
        for fk in &table.foreign_keys {
            lines.push(self.foreign_key_clause(fk));
        }

        let mut statements = vec![Statement::new(format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&table.name),
            lines.join(",\n  ")
        ))];
        for index in &table.indexes {
            statements.extend(self.render_add_index(index)?);
        }
        Ok(statements)
    }

    fn render_drop_table(&self, table: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP TABLE {}",
            self.quote_identifier(table)
        ))])
    }

    fn render_rename_table(&self, from: &str, to: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(naming::unqualified(to))
        ))])
    }

    fn render_truncate(&self, table: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "TRUNCATE TABLE {}",
            self.quote_identifier(table)
        ))])
    }

    // ---- columns ----

    fn render_add_column(&self, table: &str, column: &Column) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(table, column)
        ))])
    }

    fn render_drop_column(&self, table: &str, column: &Column) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name)
        ))])
    }

    fn render_alter_column(&self, table: &str, from: &Column, to: &Column) -> Result<Vec<Statement>>;

    // ---- indexes ----

    fn render_add_index(&self, index: &Index) -> Result<Vec<Statement>> {
        let columns = index
            .columns
            .iter()
            .map(|c| format!("{} {}", self.quote_identifier(&c.name), c.direction.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(vec![Statement::new(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(naming::unqualified(&index.name)),
            self.quote_identifier(&index.table),
            columns
        ))])
    }

    fn render_drop_index(&self, index: &Index) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP INDEX {}",
            self.quote_identifier(&naming::sibling_name(&index.table, &index.name))
        ))])
    }

    /// Structural index change as DROP followed by CREATE
    fn render_alter_index(&self, from: &Index, to: &Index) -> Result<Vec<Statement>> {
        let mut statements = self.render_drop_index(from)?;
        statements.extend(self.render_add_index(to)?);
        Ok(statements)
    }

    // ---- foreign keys ----

    fn render_add_foreign_key(&self, fk: &ForeignKey) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(&fk.table),
            self.foreign_key_clause(fk)
        ))])
    }

    fn render_drop_foreign_key(&self, fk: &ForeignKey) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(&fk.table),
            self.quote_identifier(&fk.name)
        ))])
    }

    fn render_alter_foreign_key(&self, from: &ForeignKey, to: &ForeignKey) -> Result<Vec<Statement>> {
        let mut statements = self.render_drop_foreign_key(from)?;
        statements.extend(self.render_add_foreign_key(to)?);
        Ok(statements)
    }

    // ---- dispatch ----

    /// Render one operation against the named table
    fn render_operation(&self, table: &str, operation: &Operation) -> Result<Vec<Statement>> {
        match operation {
            Operation::CreateTable(state) => self.render_create_table(state),
            Operation::DropTable(state) => self.render_drop_table(&state.name),
            Operation::RenameTable { from, to } => self.render_rename_table(from, to),
            Operation::AddColumn(column) => self.render_add_column(table, column),
            Operation::DropColumn(column) => self.render_drop_column(table, column),
            Operation::AlterColumn { from, to } => self.render_alter_column(table, from, to),
            Operation::AddIndex(index) => self.render_add_index(index),
            Operation::DropIndex(index) => self.render_drop_index(index),
            Operation::AlterIndex { from, to } => self.render_alter_index(from, to),
            Operation::AddForeignKey(fk) => self.render_add_foreign_key(fk),
            Operation::DropForeignKey(fk) => self.render_drop_foreign_key(fk),
            Operation::AlterForeignKey { from, to } => self.render_alter_foreign_key(from, to),
        }
    }

    /// Group a table's operations into apply steps
    fn plan(&self, operations: Vec<Operation>) -> Vec<Step> {
        operations.into_iter().map(Step::Operation).collect()
    }

    /// Connection settings a plan needs around its transaction: the first
    /// list runs before BEGIN, the second after COMMIT or ROLLBACK
    fn session_wrap(&self, _steps: &[Step]) -> (Vec<Statement>, Vec<Statement>) {
        (Vec::new(), Vec::new())
    }

    /// Render one step. `before` and `after` bracket the whole apply.
    fn render_step(&self, table: &str, step: &Step, _before: &TableState, _after: &TableState) -> Result<Vec<Statement>> {
        match step {
            Step::Operation(op) => self.render_operation(table, op),
            Step::Rebuild(_) => Err(Error::unsupported(
                table,
                "*",
                format!("{} does not rebuild tables", self.kind()),
            )),
        }
    }

    // ---- connection ----

    fn begin_transaction_sql(&self) -> Option<String> {
        Some("BEGIN".to_string())
    }

    fn commit_sql(&self) -> Option<String> {
        Some("COMMIT".to_string())
    }

    fn rollback_sql(&self) -> Option<String> {
        Some("ROLLBACK".to_string())
    }

    fn savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("SAVEPOINT {}", self.quote_identifier(name)))
    }

    /// Nested commit; `None` when the engine commits nested work with the parent
    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {}", self.quote_identifier(name)))
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("ROLLBACK TO SAVEPOINT {}", self.quote_identifier(name)))
    }

    /// Whether an error means the physical connection went away
    fn is_connection_lost(&self, _error: &Error) -> bool {
        false
    }
}

/// Drop attributes the abstract type does not carry and record the native type
pub(crate) fn standard_normalize<H: Handler + ?Sized>(h: &H, column: &mut Column) {
    if !column.abstract_type.carries_size() {
        column.size = None;
    }
    if column.abstract_type == AbstractType::Decimal {
        column.precision = column.precision.or(Some(10));
        column.scale = column.scale.or(Some(0));
    } else {
        column.precision = None;
        column.scale = None;
    }
    if column.abstract_type != AbstractType::Enum {
        column.enum_values.clear();
    }
    if column.abstract_type.is_primary() {
        column.nullable = false;
        column.default = None;
    }
    column.internal_type = h.native_type(column);
}

/// `name type [DEFAULT x] NULL|NOT NULL [CHECK]`
pub(crate) fn standard_column_definition<H: Handler + ?Sized>(h: &H, table: &str, column: &Column) -> String {
    let mut parts = vec![h.quote_identifier(&column.name), h.native_type(column)];
    if let Some(default) = h.render_default(column) {
        parts.push(format!("DEFAULT {}", default));
    }
    parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
    if let Some(check) = h.enum_check(table, column) {
        parts.push(check);
    }
    parts.join(" ")
}

/// Name of the constraint backing an emulated enum. An introspected name wins.
pub(crate) fn enum_constraint(dialect: DialectKind, table: &str, column: &Column) -> String {
    column
        .attributes
        .get(ENUM_CONSTRAINT)
        .cloned()
        .unwrap_or_else(|| naming::enum_constraint_name(dialect, table, &column.name))
}

/// Attribute key holding the introspected enum CHECK constraint name
pub const ENUM_CONSTRAINT: &str = "enum_constraint";

/// Attribute key holding the introspected default constraint name
pub const DEFAULT_CONSTRAINT: &str = "default_constraint";

/// Whether the column's physical type changes between two snapshots
pub(crate) fn type_changed(from: &Column, to: &Column) -> bool {
    from.abstract_type != to.abstract_type
        || from.size != to.size
        || from.precision != to.precision
        || from.scale != to.scale
}

/// Whether the rendered default differs between two snapshots
pub(crate) fn default_changed(from: &Column, to: &Column) -> bool {
    !crate::schema::compare::defaults_equal(to.abstract_type, from.default.as_ref(), to.default.as_ref())
}

/// Substitute a template such as `varchar({size})` with column arguments
pub(crate) fn render_template(template: &str, column: &Column) -> String {
    let size = column
        .size
        .or_else(|| column.abstract_type.default_size())
        .unwrap_or(255);
    template
        .replace("{size}", &size.to_string())
        .replace("{precision}", &column.precision.unwrap_or(10).to_string())
        .replace("{scale}", &column.scale.unwrap_or(0).to_string())
}

/// Quoted values of every `'...'` literal in a constraint definition
pub(crate) fn quoted_values(definition: &str) -> Vec<String> {
    static LITERAL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"'((?:[^']|'')*)'").expect("valid literal regex"));
    LITERAL_RE
        .captures_iter(definition)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().replace("''", "'"))
        .collect()
}

/// Collapse referential actions a dialect does not support to `NO ACTION`
pub(crate) fn without_restrict(action: ForeignKeyAction) -> ForeignKeyAction {
    match action {
        ForeignKeyAction::Restrict => ForeignKeyAction::NoAction,
        other => other,
    }
}

/// Case-insensitive search for any marker in an error message
pub(crate) fn message_matches(error: &Error, codes: &[&str], fragments: &[&str]) -> bool {
    let (code, message) = error.code_and_message();
    if let Some(code) = code {
        if codes.iter().any(|c| code == *c) {
            return true;
        }
    }
    let message = message.to_ascii_lowercase();
    fragments.iter().any(|f| message.contains(f))
}

/// Transport-level sqlx failures always mean the connection is gone
pub(crate) fn is_transport_error(error: &Error) -> bool {
    let inner = match error {
        Error::DdlExecutionError { source, .. } => source.as_ref(),
        other => other,
    };
    matches!(
        inner,
        Error::SqlxError(sqlx::Error::Io(_))
            | Error::SqlxError(sqlx::Error::PoolClosed)
            | Error::SqlxError(sqlx::Error::WorkerCrashed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("mysql", DialectKind::MySql)]
    #[case("PostgreSQL", DialectKind::Postgres)]
    #[case("sqlite", DialectKind::Sqlite)]
    #[case("mssql", DialectKind::SqlServer)]
    #[case("oracle", DialectKind::Oracle)]
    fn parses_driver_names(#[case] name: &str, #[case] kind: DialectKind) {
        assert_eq!(name.parse::<DialectKind>().unwrap(), kind);
        assert_eq!(kind.handler().kind(), kind);
    }

    #[test]
    fn unknown_driver_is_a_config_error() {
        assert!(matches!("db2".parse::<DialectKind>(), Err(Error::ConfigError(_))));
    }

    #[rstest]
    #[case("varchar(100)", "varchar", Some(100), None)]
    #[case("numeric(10, 2)", "numeric", Some(10), Some(2))]
    #[case("timestamp(6) with time zone", "timestamp with time zone", Some(6), None)]
    #[case("TEXT", "text", None, None)]
    fn parses_native_types(
        #[case] input: &str,
        #[case] base: &str,
        #[case] size: Option<u32>,
        #[case] scale: Option<u32>,
    ) {
        let native = NativeColumn::parse(input);
        assert_eq!(native.data_type, base);
        assert_eq!(native.size, size);
        assert_eq!(native.scale, scale);
    }

    #[test]
    fn extracts_quoted_values() {
        assert_eq!(
            quoted_values("CHECK (\"status\" IN ('new', 'it''s', 'done'))"),
            vec!["new", "it's", "done"]
        );
    }

    #[test]
    fn quoting_handles_schema_qualified_names() {
        let handler = DialectKind::Postgres.handler();
        assert_eq!(handler.quote_identifier("public.users"), "\"public\".\"users\"");
        assert_eq!(DialectKind::SqlServer.handler().quote_identifier("a]b"), "[a]]b]");
        assert_eq!(DialectKind::MySql.handler().quote_identifier("order"), "`order`");
    }
}
