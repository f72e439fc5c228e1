//! MySQL dialect

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::db::driver::Statement;
use crate::error::{Error, Result};
use crate::schema::compare::{ColumnAttribute, ComparePolicy};
use crate::schema::types::{AbstractType, Column, DefaultValue, ForeignKey, Index};

use super::{standard_normalize, DialectKind, Handler, NativeColumn};

static TYPES: Lazy<HashMap<AbstractType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (AbstractType::Primary, "int"),
        (AbstractType::BigPrimary, "bigint"),
        (AbstractType::Enum, "enum"),
        (AbstractType::String, "varchar({size})"),
        (AbstractType::Text, "text"),
        (AbstractType::Integer, "int"),
        (AbstractType::BigInteger, "bigint"),
        (AbstractType::Boolean, "tinyint(1)"),
        (AbstractType::Float, "float"),
        (AbstractType::Decimal, "decimal({precision},{scale})"),
        (AbstractType::Date, "date"),
        (AbstractType::Time, "time"),
        (AbstractType::Datetime, "datetime"),
        (AbstractType::Timestamp, "timestamp"),
        (AbstractType::Binary, "blob"),
        (AbstractType::Json, "json"),
        (AbstractType::Uuid, "char(36)"),
    ])
});

static REVERSE: Lazy<HashMap<&'static str, AbstractType>> = Lazy::new(|| {
    HashMap::from([
        ("int", AbstractType::Integer),
        ("integer", AbstractType::Integer),
        ("mediumint", AbstractType::Integer),
        ("smallint", AbstractType::Integer),
        ("tinyint", AbstractType::Integer),
        ("bigint", AbstractType::BigInteger),
        ("bool", AbstractType::Boolean),
        ("boolean", AbstractType::Boolean),
        ("enum", AbstractType::Enum),
        ("varchar", AbstractType::String),
        ("char", AbstractType::String),
        ("text", AbstractType::Text),
        ("tinytext", AbstractType::Text),
        ("mediumtext", AbstractType::Text),
        ("longtext", AbstractType::Text),
        ("float", AbstractType::Float),
        ("double", AbstractType::Float),
        ("real", AbstractType::Float),
        ("decimal", AbstractType::Decimal),
        ("numeric", AbstractType::Decimal),
        ("date", AbstractType::Date),
        ("time", AbstractType::Time),
        ("datetime", AbstractType::Datetime),
        ("timestamp", AbstractType::Timestamp),
        ("blob", AbstractType::Binary),
        ("tinyblob", AbstractType::Binary),
        ("mediumblob", AbstractType::Binary),
        ("longblob", AbstractType::Binary),
        ("binary", AbstractType::Binary),
        ("varbinary", AbstractType::Binary),
        ("json", AbstractType::Json),
    ])
});

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlHandler;

impl Handler for MySqlHandler {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn identifier_quote(&self) -> (char, char) {
        ('`', '`')
    }

    fn compare_policy(&self) -> ComparePolicy {
        ComparePolicy {
            enum_order_matters: true,
        }
    }

    fn native_type(&self, column: &Column) -> String {
        if column.abstract_type == AbstractType::Enum {
            return format!("enum({})", self.enum_list(&column.enum_values));
        }
        let template = TYPES.get(&column.abstract_type).copied().unwrap_or("text");
        super::render_template(template, column)
    }

    fn abstract_type(&self, native: &NativeColumn) -> AbstractType {
        let ty = REVERSE
            .get(native.data_type.as_str())
            .copied()
            .unwrap_or(AbstractType::String);
        match ty {
            AbstractType::Integer if native.auto_increment => AbstractType::Primary,
            AbstractType::BigInteger if native.auto_increment => AbstractType::BigPrimary,
            AbstractType::Integer if native.full_type.starts_with("tinyint(1)") => AbstractType::Boolean,
            AbstractType::String if native.data_type == "char" && native.size == Some(36) => {
                AbstractType::Uuid
            }
            other => other,
        }
    }

    /// An empty literal default on a large object is dropped, since the
    /// engine stores none. Non-empty ones are left for validation to reject.
    fn normalize_declared(&self, column: &mut Column) {
        standard_normalize(self, column);
        if column.abstract_type.is_large_object()
            && matches!(column.default, Some(DefaultValue::Literal(_)))
            && !column.has_non_empty_literal_default()
        {
            column.default = None;
        }
    }

    /// Large object columns never render a literal default
    fn render_default(&self, column: &Column) -> Option<String> {
        match column.default.as_ref()? {
            DefaultValue::Literal(_) if column.abstract_type.is_large_object() => None,
            DefaultValue::Literal(value) => Some(self.render_literal(column.abstract_type, value)),
            DefaultValue::Null => Some("NULL".to_string()),
            DefaultValue::Expression(sql) => Some(sql.clone()),
        }
    }

    fn enum_check(&self, _table: &str, _column: &Column) -> Option<String> {
        None
    }

    fn column_definition(&self, _table: &str, column: &Column) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.native_type(column)];
        parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
        if let Some(default) = self.render_default(column) {
            parts.push(format!("DEFAULT {}", default));
        }
        if column.abstract_type.is_primary() {
            parts.push("AUTO_INCREMENT".to_string());
        }
        parts.join(" ")
    }

    /// Foreign keys are backed up around any alteration of their columns
    fn backs_up_foreign_keys(&self, changes: &[ColumnAttribute]) -> bool {
        !changes.is_empty()
    }

    fn validate_column(&self, table: &str, column: &Column) -> Result<()> {
        if column.abstract_type.is_large_object() && column.has_non_empty_literal_default() {
            return Err(Error::invalid_column(
                table,
                &column.name,
                format!("{} columns cannot have a default value", column.abstract_type),
            ));
        }
        Ok(())
    }

    fn check_alteration(&self, table: &str, from: &Column, to: &Column) -> Result<()> {
        if from.abstract_type.is_primary() && to.abstract_type.is_large_object() {
            return Err(Error::unsupported(
                table,
                &to.name,
                format!("auto-increment key cannot become {}", to.abstract_type),
            ));
        }
        Ok(())
    }

    /// Single `CHANGE old new-definition` clause
    fn render_alter_column(&self, table: &str, from: &Column, to: &Column) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} CHANGE {} {}",
            self.quote_identifier(table),
            self.quote_identifier(&from.name),
            self.column_definition(table, to)
        ))])
    }

    fn render_rename_table(&self, from: &str, to: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))])
    }

    fn render_drop_index(&self, index: &Index) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table)
        ))])
    }

    fn render_drop_foreign_key(&self, fk: &ForeignKey) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote_identifier(&fk.table),
            self.quote_identifier(&fk.name)
        ))])
    }

    fn begin_transaction_sql(&self) -> Option<String> {
        Some("START TRANSACTION".to_string())
    }

    fn is_connection_lost(&self, error: &Error) -> bool {
        super::is_transport_error(error)
            || super::message_matches(
                error,
                &["2006", "2013"],
                &[
                    "server has gone away",
                    "lost connection",
                    "error while sending",
                    "decryption failed or bad record mac",
                    "ssl connection has been closed unexpectedly",
                    "broken pipe",
                    "connection reset",
                ],
            )
    }
}
