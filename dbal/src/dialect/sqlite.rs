//! SQLite dialect
//!
//! SQLite can add columns and indexes in place but nothing else. Every other
//! structural change folds into one rebuild: create a shadow table with the
//! target definition, copy rows across, drop the original and rename the
//! shadow into place.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::db::driver::Statement;
use crate::error::{Error, Result};
use crate::schema::diff::Operation;
use crate::schema::types::{AbstractType, Column, DefaultValue, ForeignKey, Index, TableState};
use crate::utils::naming;

use super::{standard_column_definition, standard_normalize, DialectKind, Handler, NativeColumn, Step};

/// Abstract type to native type. `string` ignores the declared size: SQLite
/// does not enforce lengths, so every string is stored as `varchar(255)`.
static TYPES: Lazy<HashMap<AbstractType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (AbstractType::Primary, "integer"),
        (AbstractType::BigPrimary, "integer"),
        (AbstractType::Enum, "varchar(255)"),
        (AbstractType::String, "varchar(255)"),
        (AbstractType::Text, "text"),
        (AbstractType::Integer, "integer"),
        (AbstractType::BigInteger, "bigint"),
        (AbstractType::Boolean, "boolean"),
        (AbstractType::Float, "real"),
        (AbstractType::Decimal, "numeric({precision}, {scale})"),
        (AbstractType::Date, "date"),
        (AbstractType::Time, "time"),
        (AbstractType::Datetime, "datetime"),
        (AbstractType::Timestamp, "timestamp"),
        (AbstractType::Binary, "blob"),
        (AbstractType::Json, "json"),
        (AbstractType::Uuid, "uuid"),
    ])
});

static REVERSE: Lazy<HashMap<&'static str, AbstractType>> = Lazy::new(|| {
    HashMap::from([
        ("integer", AbstractType::Integer),
        ("int", AbstractType::Integer),
        ("bigint", AbstractType::BigInteger),
        ("varchar", AbstractType::String),
        ("character varying", AbstractType::String),
        ("nvarchar", AbstractType::String),
        ("char", AbstractType::String),
        ("text", AbstractType::Text),
        ("clob", AbstractType::Text),
        ("boolean", AbstractType::Boolean),
        ("bool", AbstractType::Boolean),
        ("real", AbstractType::Float),
        ("float", AbstractType::Float),
        ("double", AbstractType::Float),
        ("numeric", AbstractType::Decimal),
        ("decimal", AbstractType::Decimal),
        ("date", AbstractType::Date),
        ("time", AbstractType::Time),
        ("datetime", AbstractType::Datetime),
        ("timestamp", AbstractType::Timestamp),
        ("blob", AbstractType::Binary),
        ("json", AbstractType::Json),
        ("uuid", AbstractType::Uuid),
    ])
});

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteHandler;

impl SqliteHandler {
    /// Operations SQLite cannot perform with a plain ALTER TABLE
    pub fn requires_rebuild(&self, operation: &Operation) -> bool {
        match operation {
            Operation::AddColumn(column) => {
                column.abstract_type.is_primary()
                    || matches!(column.default, Some(DefaultValue::Expression(_)))
                    || (!column.nullable
                        && column.default.as_ref().map_or(true, DefaultValue::is_null))
            }
            Operation::DropColumn(_)
            | Operation::AlterColumn { .. }
            | Operation::AddForeignKey(_)
            | Operation::DropForeignKey(_)
            | Operation::AlterForeignKey { .. } => true,
            _ => false,
        }
    }

    fn render_rebuild(&self, operations: &[Operation], before: &TableState, after: &TableState) -> Result<Vec<Statement>> {
        let table = after.name.as_str();
        let shadow = naming::shadow_table_name(table);

        let mut target = after.clone();
        target.name = shadow.clone();
        target.indexes.clear();
        let mut statements = self.render_create_table(&target)?;

        // new name -> old name for renamed columns
        let sources: HashMap<&str, &str> = operations
            .iter()
            .filter_map(|op| match op {
                Operation::AlterColumn { from, to } if from.name != to.name => {
                    Some((to.name.as_str(), from.name.as_str()))
                }
                _ => None,
            })
            .collect();

        let mut targets = Vec::new();
        let mut selected = Vec::new();
        for column in &after.columns {
            let source = sources.get(column.name.as_str()).copied().unwrap_or(&column.name);
            if before.has_column(source) {
                targets.push(self.quote_identifier(&column.name));
                selected.push(self.quote_identifier(source));
            }
        }
        if !targets.is_empty() {
            statements.push(Statement::new(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(&shadow),
                targets.join(", "),
                selected.join(", "),
                self.quote_identifier(table)
            )));
        }

        statements.push(Statement::new(format!("DROP TABLE {}", self.quote_identifier(table))));
        statements.push(Statement::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(&shadow),
            self.quote_identifier(naming::unqualified(table))
        )));
        for index in &after.indexes {
            let mut index = index.clone();
            index.table = table.to_string();
            statements.extend(self.render_add_index(&index)?);
        }
        Ok(statements)
    }
}

impl Handler for SqliteHandler {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
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
            AbstractType::String if native.has_enum_check => AbstractType::Enum,
            other => other,
        }
    }

    /// `bigPrimary` and `primary` are both the rowid alias
    fn normalize_declared(&self, column: &mut Column) {
        if column.abstract_type == AbstractType::BigPrimary {
            column.abstract_type = AbstractType::Primary;
        }
        standard_normalize(self, column);
    }

    fn column_definition(&self, table: &str, column: &Column) -> String {
        if column.abstract_type.is_primary() {
            return format!(
                "{} integer PRIMARY KEY AUTOINCREMENT NOT NULL",
                self.quote_identifier(&column.name)
            );
        }
        standard_column_definition(self, table, column)
    }

    fn inline_primary_key(&self, table: &TableState) -> bool {
        table.primary_keys.len() == 1
            && table
                .column(&table.primary_keys[0])
                .map_or(false, |c| c.abstract_type.is_primary())
    }

    fn render_truncate(&self, table: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DELETE FROM {}",
            self.quote_identifier(table)
        ))])
    }

    fn render_alter_column(&self, table: &str, _from: &Column, to: &Column) -> Result<Vec<Statement>> {
        Err(Error::unsupported(table, &to.name, "SQLite alters columns by rebuilding the table"))
    }

    fn render_add_foreign_key(&self, fk: &ForeignKey) -> Result<Vec<Statement>> {
        Err(Error::unsupported(&fk.table, &fk.columns.join(","), "SQLite adds foreign keys by rebuilding the table"))
    }

    fn render_drop_foreign_key(&self, fk: &ForeignKey) -> Result<Vec<Statement>> {
        Err(Error::unsupported(&fk.table, &fk.columns.join(","), "SQLite drops foreign keys by rebuilding the table"))
    }

    fn render_drop_index(&self, index: &Index) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP INDEX {}",
            self.quote_identifier(&index.name)
        ))])
    }

    fn plan(&self, operations: Vec<Operation>) -> Vec<Step> {
        if !operations.iter().any(|op| self.requires_rebuild(op)) {
            return operations.into_iter().map(Step::Operation).collect();
        }

        // Table renames run first so the rebuild works on the final name
        let (renames, rest): (Vec<Operation>, Vec<Operation>) = operations
            .into_iter()
            .partition(|op| matches!(op, Operation::RenameTable { .. }));
        let mut steps: Vec<Step> = renames.into_iter().map(Step::Operation).collect();
        steps.push(Step::Rebuild(rest));
        steps
    }

    fn render_step(&self, table: &str, step: &Step, before: &TableState, after: &TableState) -> Result<Vec<Statement>> {
        match step {
            Step::Operation(op) => self.render_operation(table, op),
            Step::Rebuild(operations) => self.render_rebuild(operations, before, after),
        }
    }

    /// Dropping the rebuilt original must not cascade into referencing
    /// tables. SQLite ignores `foreign_keys` inside a transaction, so the
    /// switch happens outside it.
    fn session_wrap(&self, steps: &[Step]) -> (Vec<Statement>, Vec<Statement>) {
        if steps.iter().any(|step| matches!(step, Step::Rebuild(_))) {
            (
                vec![Statement::new("PRAGMA foreign_keys = OFF")],
                vec![Statement::new("PRAGMA foreign_keys = ON")],
            )
        } else {
            (Vec::new(), Vec::new())
        }
    }
}
