//! PostgreSQL dialect

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::db::driver::Statement;
use crate::error::{Error, Result};
use crate::schema::types::{AbstractType, Column};

use super::{default_changed, enum_constraint, type_changed, DialectKind, Handler, NativeColumn};

static TYPES: Lazy<HashMap<AbstractType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (AbstractType::Primary, "serial"),
        (AbstractType::BigPrimary, "bigserial"),
        (AbstractType::Enum, "character varying(255)"),
        (AbstractType::String, "character varying({size})"),
        (AbstractType::Text, "text"),
        (AbstractType::Integer, "integer"),
        (AbstractType::BigInteger, "bigint"),
        (AbstractType::Boolean, "boolean"),
        (AbstractType::Float, "real"),
        (AbstractType::Decimal, "numeric({precision},{scale})"),
        (AbstractType::Date, "date"),
        (AbstractType::Time, "time without time zone"),
        (AbstractType::Datetime, "timestamp without time zone"),
        (AbstractType::Timestamp, "timestamp with time zone"),
        (AbstractType::Binary, "bytea"),
        (AbstractType::Json, "json"),
        (AbstractType::Uuid, "uuid"),
    ])
});

/// Keyed by `information_schema.columns.data_type`
static REVERSE: Lazy<HashMap<&'static str, AbstractType>> = Lazy::new(|| {
    HashMap::from([
        ("integer", AbstractType::Integer),
        ("smallint", AbstractType::Integer),
        ("bigint", AbstractType::BigInteger),
        ("character varying", AbstractType::String),
        ("character", AbstractType::String),
        ("text", AbstractType::Text),
        ("boolean", AbstractType::Boolean),
        ("real", AbstractType::Float),
        ("double precision", AbstractType::Float),
        ("numeric", AbstractType::Decimal),
        ("date", AbstractType::Date),
        ("time without time zone", AbstractType::Time),
        ("time with time zone", AbstractType::Time),
        ("timestamp without time zone", AbstractType::Datetime),
        ("timestamp with time zone", AbstractType::Timestamp),
        ("bytea", AbstractType::Binary),
        ("json", AbstractType::Json),
        ("jsonb", AbstractType::Json),
        ("uuid", AbstractType::Uuid),
    ])
});

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresHandler;

impl PostgresHandler {
    /// Type used in `ALTER COLUMN ... TYPE`, where serial pseudo-types are not allowed
    fn storage_type(&self, column: &Column) -> String {
        match column.abstract_type {
            AbstractType::Primary => "integer".to_string(),
            AbstractType::BigPrimary => "bigint".to_string(),
            _ => self.native_type(column),
        }
    }
}

impl Handler for PostgresHandler {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn native_type(&self, column: &Column) -> String {
        let template = TYPES.get(&column.abstract_type).copied().unwrap_or("text");
        super::render_template(template, column)
    }

    fn abstract_type(&self, native: &NativeColumn) -> AbstractType {
        let ty = REVERSE
            .get(native.data_type.as_str())
            .copied()
            .unwrap_or(AbstractType::Text);
        match ty {
            AbstractType::Integer if native.auto_increment => AbstractType::Primary,
            AbstractType::BigInteger if native.auto_increment => AbstractType::BigPrimary,
            AbstractType::String if native.has_enum_check => AbstractType::Enum,
            other => other,
        }
    }

    fn render_bool(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn check_alteration(&self, table: &str, from: &Column, to: &Column) -> Result<()> {
        let (a, b) = (from.abstract_type, to.abstract_type);
        if a == b {
            return Ok(());
        }
        if b.is_primary() && !a.is_primary() {
            return Err(Error::unsupported(
                table,
                &to.name,
                "an existing column cannot become serial",
            ));
        }
        if (a == AbstractType::Binary) != (b == AbstractType::Binary) {
            return Err(Error::unsupported(
                table,
                &to.name,
                format!("cannot convert {} to {}", a, b),
            ));
        }
        let numeric = |t: AbstractType| t.is_numeric() || t == AbstractType::Boolean;
        if (a.is_temporal() && numeric(b)) || (numeric(a) && b.is_temporal()) {
            return Err(Error::unsupported(
                table,
                &to.name,
                format!("cannot convert {} to {}", a, b),
            ));
        }
        Ok(())
    }

    /// Rename as its own statement, then every other change as clauses of one ALTER TABLE
    fn render_alter_column(&self, table: &str, from: &Column, to: &Column) -> Result<Vec<Statement>> {
        let quoted_table = self.quote_identifier(table);
        let column = self.quote_identifier(&to.name);
        let mut statements = Vec::new();

        if from.name != to.name {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quoted_table,
                self.quote_identifier(&from.name),
                column
            )));
        }

        let retyped = type_changed(from, to) || from.enum_values != to.enum_values;
        let mut clauses = Vec::new();

        if retyped && from.abstract_type == AbstractType::Enum {
            clauses.push(format!(
                "DROP CONSTRAINT IF EXISTS {}",
                self.quote_identifier(&enum_constraint(self.kind(), table, from))
            ));
        }
        if type_changed(from, to) {
            if from.default.is_some() {
                clauses.push(format!("ALTER COLUMN {} DROP DEFAULT", column));
            }
            let ty = self.storage_type(to);
            clauses.push(format!("ALTER COLUMN {} TYPE {} USING {}::{}", column, ty, column, ty));
        }
        if from.nullable != to.nullable && !to.abstract_type.is_primary() {
            clauses.push(format!(
                "ALTER COLUMN {} {} NOT NULL",
                column,
                if to.nullable { "DROP" } else { "SET" }
            ));
        }
        if default_changed(from, to) || (type_changed(from, to) && from.default.is_some()) {
            match self.render_default(to) {
                Some(default) if !to.abstract_type.is_primary() => {
                    clauses.push(format!("ALTER COLUMN {} SET DEFAULT {}", column, default))
                }
                _ if !type_changed(from, to) => {
                    clauses.push(format!("ALTER COLUMN {} DROP DEFAULT", column))
                }
                _ => {}
            }
        }
        if retyped {
            if let Some(check) = self.enum_check(table, to) {
                clauses.push(format!("ADD {}", check));
            }
        }

        if !clauses.is_empty() {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} {}",
                quoted_table,
                clauses.join(", ")
            )));
        }
        Ok(statements)
    }

    fn is_connection_lost(&self, error: &Error) -> bool {
        if super::is_transport_error(error) {
            return true;
        }
        let (code, _) = error.code_and_message();
        code.map_or(false, |c| c.starts_with("08"))
            || super::message_matches(
                error,
                &[],
                &[
                    "terminating connection",
                    "server closed the connection unexpectedly",
                    "no connection to the server",
                    "could not receive data from server",
                    "connection reset",
                    "broken pipe",
                ],
            )
    }
}
