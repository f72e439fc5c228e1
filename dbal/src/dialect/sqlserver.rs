//! SQL Server dialect
//!
//! Every alteration backs up all dependent indexes and foreign keys. Renames
//! go through `sp_rename`, and each changed column attribute gets its own
//! ALTER statement. Defaults are named constraints so they can be dropped.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::db::driver::Statement;
use crate::error::{Error, Result};
use crate::schema::compare::ColumnAttribute;
use crate::schema::types::{AbstractType, Column, ForeignKey, Index};
use crate::utils::naming;

use super::{
    default_changed, enum_constraint, type_changed, without_restrict, DialectKind, Handler,
    NativeColumn, DEFAULT_CONSTRAINT,
};

static TYPES: Lazy<HashMap<AbstractType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (AbstractType::Primary, "int"),
        (AbstractType::BigPrimary, "bigint"),
        (AbstractType::Enum, "varchar(255)"),
        (AbstractType::String, "nvarchar({size})"),
        (AbstractType::Text, "nvarchar(max)"),
        (AbstractType::Integer, "int"),
        (AbstractType::BigInteger, "bigint"),
        (AbstractType::Boolean, "bit"),
        (AbstractType::Float, "real"),
        (AbstractType::Decimal, "decimal({precision},{scale})"),
        (AbstractType::Date, "date"),
        (AbstractType::Time, "time"),
        (AbstractType::Datetime, "datetime"),
        (AbstractType::Timestamp, "datetime2"),
        (AbstractType::Binary, "varbinary(max)"),
        (AbstractType::Json, "varchar(max)"),
        (AbstractType::Uuid, "uniqueidentifier"),
    ])
});

/// Keyed by `sys.types.name`; sizes are resolved by [`SqlServerHandler::abstract_type`]
static REVERSE: Lazy<HashMap<&'static str, AbstractType>> = Lazy::new(|| {
    HashMap::from([
        ("int", AbstractType::Integer),
        ("smallint", AbstractType::Integer),
        ("tinyint", AbstractType::Integer),
        ("bigint", AbstractType::BigInteger),
        ("nvarchar", AbstractType::String),
        ("nchar", AbstractType::String),
        ("varchar", AbstractType::String),
        ("char", AbstractType::String),
        ("ntext", AbstractType::Text),
        ("text", AbstractType::Text),
        ("bit", AbstractType::Boolean),
        ("real", AbstractType::Float),
        ("float", AbstractType::Float),
        ("decimal", AbstractType::Decimal),
        ("numeric", AbstractType::Decimal),
        ("date", AbstractType::Date),
        ("time", AbstractType::Time),
        ("datetime", AbstractType::Datetime),
        ("smalldatetime", AbstractType::Datetime),
        ("datetime2", AbstractType::Timestamp),
        ("datetimeoffset", AbstractType::Timestamp),
        ("varbinary", AbstractType::Binary),
        ("binary", AbstractType::Binary),
        ("image", AbstractType::Binary),
        ("uniqueidentifier", AbstractType::Uuid),
    ])
});

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerHandler;

impl SqlServerHandler {
    fn default_constraint(&self, table: &str, column: &Column) -> String {
        column
            .attributes
            .get(DEFAULT_CONSTRAINT)
            .cloned()
            .unwrap_or_else(|| naming::default_constraint_name(table, &column.name))
    }

    fn has_default(column: &Column) -> bool {
        column.default.as_ref().map_or(false, |d| !d.is_null())
    }

    fn alter_column_type(&self, table: &str, column: &Column, nullable: bool) -> Statement {
        Statement::new(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name),
            self.native_type(column),
            if nullable { "NULL" } else { "NOT NULL" }
        ))
    }

    fn drop_constraint(&self, table: &str, name: &str) -> Statement {
        Statement::new(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }
}

impl Handler for SqlServerHandler {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn identifier_quote(&self) -> (char, char) {
        ('[', ']')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn native_type(&self, column: &Column) -> String {
        let template = TYPES.get(&column.abstract_type).copied().unwrap_or("nvarchar(max)");
        super::render_template(template, column)
    }

    fn abstract_type(&self, native: &NativeColumn) -> AbstractType {
        let ty = REVERSE
            .get(native.data_type.as_str())
            .copied()
            .unwrap_or(AbstractType::String);
        // `max` lengths arrive as -1 and are surfaced as a missing size
        let unbounded = native.full_type.contains("(max)") || native.size.is_none();
        match ty {
            AbstractType::Integer if native.auto_increment => AbstractType::Primary,
            AbstractType::BigInteger if native.auto_increment => AbstractType::BigPrimary,
            AbstractType::String if native.has_enum_check => AbstractType::Enum,
            AbstractType::String if native.data_type == "nvarchar" && unbounded => AbstractType::Text,
            AbstractType::String if native.data_type == "varchar" && unbounded => AbstractType::Json,
            other => other,
        }
    }

    fn normalize_foreign_key(&self, fk: &mut ForeignKey) {
        fk.on_delete = without_restrict(fk.on_delete);
        fk.on_update = without_restrict(fk.on_update);
    }

    /// Every alteration backs up every dependent index
    fn backs_up_indexes(&self, changes: &[ColumnAttribute]) -> bool {
        !changes.is_empty()
    }

    /// Every alteration backs up every dependent foreign key
    fn backs_up_foreign_keys(&self, changes: &[ColumnAttribute]) -> bool {
        !changes.is_empty()
    }

    fn check_alteration(&self, table: &str, from: &Column, to: &Column) -> Result<()> {
        if from.abstract_type.is_primary() != to.abstract_type.is_primary() {
            return Err(Error::unsupported(
                table,
                &to.name,
                "IDENTITY cannot be added to or removed from an existing column",
            ));
        }
        let binary = |t: AbstractType| t == AbstractType::Binary;
        if binary(from.abstract_type) != binary(to.abstract_type) {
            return Err(Error::unsupported(
                table,
                &to.name,
                format!("cannot convert {} to {}", from.abstract_type, to.abstract_type),
            ));
        }
        Ok(())
    }

    fn column_definition(&self, table: &str, column: &Column) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.native_type(column)];
        if column.abstract_type.is_primary() {
            parts.push("IDENTITY(1,1)".to_string());
        }
        parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
        if Self::has_default(column) {
            if let Some(default) = self.render_default(column) {
                parts.push(format!(
                    "CONSTRAINT {} DEFAULT {}",
                    self.quote_identifier(&self.default_constraint(table, column)),
                    default
                ));
            }
        }
        if let Some(check) = self.enum_check(table, column) {
            parts.push(check);
        }
        parts.join(" ")
    }

    fn render_add_column(&self, table: &str, column: &Column) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.column_definition(table, column)
        ))])
    }

    /// Column-bound constraints go first, the engine refuses to drop a constrained column
    fn render_drop_column(&self, table: &str, column: &Column) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        if Self::has_default(column) {
            statements.push(self.drop_constraint(table, &self.default_constraint(table, column)));
        }
        if column.abstract_type == AbstractType::Enum {
            statements.push(self.drop_constraint(table, &enum_constraint(self.kind(), table, column)));
        }
        statements.push(Statement::new(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name)
        )));
        Ok(statements)
    }

    fn render_alter_column(&self, table: &str, from: &Column, to: &Column) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();

        if from.name != to.name {
            statements.push(Statement::with_params(
                format!(
                    "EXEC sp_rename {}, {}, 'COLUMN'",
                    self.placeholder(1),
                    self.placeholder(2)
                ),
                vec![
                    format!("{}.{}", table, from.name).into(),
                    to.name.clone().into(),
                ],
            ));
        }

        let retyped = type_changed(from, to);
        let enum_changed = retyped || from.enum_values != to.enum_values;
        let redefault = default_changed(from, to) || (retyped && Self::has_default(from));

        if redefault && Self::has_default(from) {
            statements.push(self.drop_constraint(table, &self.default_constraint(table, from)));
        }
        if enum_changed && from.abstract_type == AbstractType::Enum {
            statements.push(self.drop_constraint(table, &enum_constraint(self.kind(), table, from)));
        }
        if retyped {
            statements.push(self.alter_column_type(table, to, from.nullable));
        }
        if from.nullable != to.nullable {
            statements.push(self.alter_column_type(table, to, to.nullable));
        }
        if redefault && Self::has_default(to) {
            if let Some(default) = self.render_default(to) {
                statements.push(Statement::new(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {}",
                    self.quote_identifier(table),
                    self.quote_identifier(&naming::default_constraint_name(table, &to.name)),
                    default,
                    self.quote_identifier(&to.name)
                )));
            }
        }
        if enum_changed {
            if let Some(check) = self.enum_check(table, to) {
                statements.push(Statement::new(format!(
                    "ALTER TABLE {} ADD {}",
                    self.quote_identifier(table),
                    check
                )));
            }
        }
        Ok(statements)
    }

    fn render_rename_table(&self, from: &str, to: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::with_params(
            format!("EXEC sp_rename {}, {}", self.placeholder(1), self.placeholder(2)),
            vec![from.into(), naming::unqualified(to).into()],
        )])
    }

    fn render_drop_index(&self, index: &Index) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table)
        ))])
    }

    fn begin_transaction_sql(&self) -> Option<String> {
        Some("BEGIN TRANSACTION".to_string())
    }

    fn commit_sql(&self) -> Option<String> {
        Some("COMMIT TRANSACTION".to_string())
    }

    fn rollback_sql(&self) -> Option<String> {
        Some("ROLLBACK TRANSACTION".to_string())
    }

    fn savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("SAVE TRANSACTION {}", self.quote_identifier(name)))
    }

    /// Nested work commits together with the outer transaction
    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("ROLLBACK TRANSACTION {}", self.quote_identifier(name)))
    }

    fn is_connection_lost(&self, error: &Error) -> bool {
        super::is_transport_error(error)
            || super::message_matches(
                error,
                &["10054", "10053", "233", "-2", "08S01"],
                &[
                    "connection is broken",
                    "communication link failure",
                    "physical connection is not usable",
                    "forcibly closed by the remote host",
                    "connection reset",
                    "broken pipe",
                ],
            )
    }
}
