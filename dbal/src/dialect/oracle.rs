//! Oracle dialect
//!
//! Column changes collapse into one `MODIFY (...)` clause. Oracle only knows
//! `ON DELETE` actions, and indexes or foreign keys dropped around an
//! alteration are not recreated.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::db::driver::Statement;
use crate::error::{Error, Result};
use crate::schema::types::{AbstractType, Column, ForeignKey, ForeignKeyAction};

use super::{
    default_changed, enum_constraint, type_changed, without_restrict, DialectKind, Handler,
    NativeColumn,
};

static TYPES: Lazy<HashMap<AbstractType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (AbstractType::Primary, "number(10)"),
        (AbstractType::BigPrimary, "number(19)"),
        (AbstractType::Enum, "varchar2(255)"),
        (AbstractType::String, "varchar2({size})"),
        (AbstractType::Text, "clob"),
        (AbstractType::Integer, "number(10)"),
        (AbstractType::BigInteger, "number(19)"),
        (AbstractType::Boolean, "number(1)"),
        (AbstractType::Float, "binary_float"),
        (AbstractType::Decimal, "number({precision},{scale})"),
        (AbstractType::Date, "date"),
        (AbstractType::Time, "interval day(0) to second(6)"),
        (AbstractType::Datetime, "timestamp(6)"),
        (AbstractType::Timestamp, "timestamp(6) with time zone"),
        (AbstractType::Binary, "blob"),
        (AbstractType::Json, "json"),
        (AbstractType::Uuid, "raw(16)"),
    ])
});

#[derive(Debug, Default, Clone, Copy)]
pub struct OracleHandler;

impl OracleHandler {
    fn is_lob(ty: AbstractType) -> bool {
        matches!(ty, AbstractType::Text | AbstractType::Binary)
    }

    /// NUMBER columns are told apart by their declared precision
    fn number_type(native: &NativeColumn) -> AbstractType {
        if native.auto_increment {
            return match native.precision {
                Some(p) if p > 10 => AbstractType::BigPrimary,
                _ => AbstractType::Primary,
            };
        }
        match (native.precision, native.scale.unwrap_or(0)) {
            (Some(1), 0) => AbstractType::Boolean,
            (Some(19), 0) => AbstractType::BigInteger,
            (Some(p), 0) if p <= 10 => AbstractType::Integer,
            (None, 0) => AbstractType::Integer,
            _ => AbstractType::Decimal,
        }
    }
}

impl Handler for OracleHandler {
    fn kind(&self) -> DialectKind {
        DialectKind::Oracle
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn native_type(&self, column: &Column) -> String {
        let template = TYPES.get(&column.abstract_type).copied().unwrap_or("clob");
        super::render_template(template, column)
    }

    fn abstract_type(&self, native: &NativeColumn) -> AbstractType {
        let data_type = native.data_type.as_str();
        match data_type {
            "number" | "integer" => Self::number_type(native),
            "varchar2" | "nvarchar2" | "varchar" | "char" | "nchar" if native.has_enum_check => {
                AbstractType::Enum
            }
            "varchar2" | "nvarchar2" | "varchar" | "char" | "nchar" => AbstractType::String,
            "clob" | "nclob" | "long" => AbstractType::Text,
            "binary_float" | "binary_double" | "float" => AbstractType::Float,
            "date" => AbstractType::Date,
            "timestamp" => AbstractType::Datetime,
            "timestamp with time zone" | "timestamp with local time zone" => AbstractType::Timestamp,
            "raw" if native.size == Some(16) => AbstractType::Uuid,
            "raw" | "blob" | "long raw" => AbstractType::Binary,
            "json" => AbstractType::Json,
            other if other.starts_with("interval day") => AbstractType::Time,
            _ => AbstractType::Text,
        }
    }

    /// Only `ON DELETE` exists and `RESTRICT` is spelled `NO ACTION`
    fn normalize_foreign_key(&self, fk: &mut ForeignKey) {
        fk.on_delete = without_restrict(fk.on_delete);
        fk.on_update = ForeignKeyAction::NoAction;
    }

    fn restores_dependencies(&self) -> bool {
        false
    }

    fn check_alteration(&self, table: &str, from: &Column, to: &Column) -> Result<()> {
        if from.abstract_type.is_primary() != to.abstract_type.is_primary() {
            return Err(Error::unsupported(
                table,
                &to.name,
                "identity cannot be added to or removed from an existing column",
            ));
        }
        if Self::is_lob(from.abstract_type) != Self::is_lob(to.abstract_type) {
            return Err(Error::unsupported(
                table,
                &to.name,
                format!("cannot modify {} column to {}", from.abstract_type, to.abstract_type),
            ));
        }
        Ok(())
    }

    fn column_definition(&self, table: &str, column: &Column) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.native_type(column)];
        if column.abstract_type.is_primary() {
            parts.push("GENERATED BY DEFAULT AS IDENTITY".to_string());
        } else if let Some(default) = self.render_default(column) {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
        if let Some(check) = self.enum_check(table, column) {
            parts.push(check);
        }
        parts.join(" ")
    }

    fn referential_actions(&self, fk: &ForeignKey) -> String {
        match fk.on_delete {
            ForeignKeyAction::Cascade | ForeignKeyAction::SetNull => {
                format!(" ON DELETE {}", fk.on_delete.as_sql())
            }
            _ => String::new(),
        }
    }

    fn render_add_column(&self, table: &str, column: &Column) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "ALTER TABLE {} ADD ({})",
            self.quote_identifier(table),
            self.column_definition(table, column)
        ))])
    }

    fn render_alter_column(&self, table: &str, from: &Column, to: &Column) -> Result<Vec<Statement>> {
        let quoted_table = self.quote_identifier(table);
        let mut statements = Vec::new();

        if from.name != to.name {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quoted_table,
                self.quote_identifier(&from.name),
                self.quote_identifier(&to.name)
            )));
        }

        let retyped = type_changed(from, to);
        let enum_changed = retyped || from.enum_values != to.enum_values;
        if enum_changed && from.abstract_type == AbstractType::Enum {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                quoted_table,
                self.quote_identifier(&enum_constraint(self.kind(), table, from))
            )));
        }

        let mut modify = Vec::new();
        if retyped {
            modify.push(self.native_type(to));
        }
        if default_changed(from, to) && !to.abstract_type.is_primary() {
            modify.push(format!(
                "DEFAULT {}",
                self.render_default(to).unwrap_or_else(|| "NULL".to_string())
            ));
        }
        if from.nullable != to.nullable {
            modify.push(if to.nullable { "NULL" } else { "NOT NULL" }.to_string());
        }
        if !modify.is_empty() {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} MODIFY ({} {})",
                quoted_table,
                self.quote_identifier(&to.name),
                modify.join(" ")
            )));
        }

        if enum_changed {
            if let Some(check) = self.enum_check(table, to) {
                statements.push(Statement::new(format!("ALTER TABLE {} ADD {}", quoted_table, check)));
            }
        }
        Ok(statements)
    }

    /// Transactions start implicitly with the first statement
    fn begin_transaction_sql(&self) -> Option<String> {
        None
    }

    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn is_connection_lost(&self, error: &Error) -> bool {
        super::is_transport_error(error)
            || super::message_matches(
                error,
                &["3113", "3114", "3135", "ORA-03113", "ORA-03114", "ORA-03135"],
                &[
                    "ora-03113",
                    "ora-03114",
                    "ora-03135",
                    "end-of-file on communication channel",
                    "not connected to oracle",
                    "connection lost contact",
                ],
            )
    }
}
