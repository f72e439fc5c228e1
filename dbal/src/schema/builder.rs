//! Declarative table API
//!
//! A [`TableSchema`] holds two snapshots of one table: the current state
//! read from the database and the declared state the caller builds up.
//! `save` diffs them, applies the result and adopts the new state as
//! current.

use tracing::debug;

use crate::db::apply::{self, ApplyOutcome};
use crate::db::driver::Statement;
use crate::db::executor::Database;
use crate::error::{Error, Result};
use crate::schema::diff::{apply_operations, diff_table, rename_column_references, ChangeSet, ColumnRename, SaveMode};
use crate::schema::types::{Column, ForeignKey, ForeignKeyAction, Index, IndexColumn, TableState};
use crate::utils::naming;

/// Parse `"name"`, `"name DESC"` or `"name ASC"`
fn index_column(definition: &str) -> IndexColumn {
    let definition = definition.trim();
    match definition.rsplit_once(' ') {
        Some((name, dir)) if dir.eq_ignore_ascii_case("desc") => IndexColumn::desc(name.trim()),
        Some((name, dir)) if dir.eq_ignore_ascii_case("asc") => IndexColumn::asc(name.trim()),
        _ => IndexColumn::asc(definition),
    }
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Current and declared state of one table
#[derive(Debug, Clone)]
pub struct TableSchema {
    db: Database,
    current: TableState,
    /// `None` once the table is declared dropped
    declared: Option<TableState>,
    renames: Vec<ColumnRename>,
}

impl TableSchema {
    pub(crate) fn new(db: Database, current: TableState) -> Self {
        let declared = Some(current.clone());
        Self {
            db,
            current,
            declared,
            renames: Vec::new(),
        }
    }

    /// Build from explicit snapshots, without introspection
    pub fn from_states(db: Database, current: TableState, declared: Option<TableState>) -> Self {
        Self {
            db,
            current,
            declared,
            renames: Vec::new(),
        }
    }

    /// Declared name, or the current one for a table declared dropped
    pub fn name(&self) -> &str {
        self.declared
            .as_ref()
            .map(|d| d.name.as_str())
            .unwrap_or(&self.current.name)
    }

    pub fn exists(&self) -> bool {
        self.current.exists
    }

    pub fn current(&self) -> &TableState {
        &self.current
    }

    pub fn declared(&self) -> Option<&TableState> {
        self.declared.as_ref()
    }

    pub fn renames(&self) -> &[ColumnRename] {
        &self.renames
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Declared state, revived from the current one after `declare_dropped`
    fn declared_mut(&mut self) -> &mut TableState {
        let current = &self.current;
        self.declared.get_or_insert_with(|| current.clone())
    }

    fn missing(&self, what: &str) -> Error {
        Error::table_operation(self.name(), format!("{} is not declared", what))
    }

    /// Declare a column, replacing a declared column of the same name.
    /// Primary columns join the primary key.
    pub fn column(&mut self, column: Column) -> &mut Self {
        let declared = self.declared_mut();
        if column.abstract_type.is_primary() && !declared.primary_keys.contains(&column.name) {
            declared.primary_keys.push(column.name.clone());
        }
        declared.upsert_column(column);
        self
    }

    /// Remove a column with the indexes and foreign keys that use it
    pub fn drop_column(&mut self, name: &str) -> Result<&mut Self> {
        if !self.declared().map_or(false, |d| d.has_column(name)) {
            return Err(self.missing(&format!("column `{}`", name)));
        }
        let declared = self.declared_mut();
        declared.columns.retain(|c| c.name != name);
        declared.primary_keys.retain(|c| c != name);
        declared.indexes.retain(|i| !i.involves(name));
        declared.foreign_keys.retain(|fk| !fk.involves(name));
        Ok(self)
    }

    /// Rename a declared column. The hint lets the diff keep its data.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<&mut Self> {
        let declared = self.declared().ok_or_else(|| self.missing("table"))?;
        if !declared.has_column(from) {
            return Err(self.missing(&format!("column `{}`", from)));
        }
        if declared.has_column(to) {
            return Err(Error::table_operation(
                self.name(),
                format!("column `{}` already exists", to),
            ));
        }

        let declared = self.declared_mut();
        if let Some(column) = declared.columns.iter_mut().find(|c| c.name == from) {
            column.name = to.to_string();
        }
        rename_column_references(declared, from, to);

        // a column renamed twice keeps its original source
        match self.renames.iter_mut().find(|r| r.to == from) {
            Some(hint) => hint.to = to.to_string(),
            None => self.renames.push(ColumnRename {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
        Ok(self)
    }

    /// Declare an index over `columns`; append ` DESC` to a column for a
    /// descending key
    pub fn index(&mut self, columns: &[&str], unique: bool) -> &mut Self {
        let columns: Vec<IndexColumn> = columns.iter().map(|c| index_column(c)).collect();
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let dialect = self.db.dialect();
        let declared = self.declared_mut();
        let table = declared.name.clone();

        match declared
            .indexes
            .iter_mut()
            .find(|i| i.signature() == names)
        {
            Some(existing) => {
                existing.columns = columns;
                existing.unique = unique;
            }
            None => {
                let name = naming::index_name(dialect, &table, &names);
                declared.indexes.push(Index::new(&table, &name, columns, unique));
            }
        }
        self
    }

    pub fn drop_index(&mut self, columns: &[&str]) -> Result<&mut Self> {
        let names: Vec<String> = columns.iter().map(|c| index_column(c).name).collect();
        let found = self
            .declared()
            .map_or(false, |d| d.find_index(&names).is_some());
        if !found {
            return Err(self.missing(&format!("index on ({})", names.join(", "))));
        }
        self.declared_mut().indexes.retain(|i| i.signature() != names);
        Ok(self)
    }

    /// Declare a foreign key. The foreign table gets the prefix.
    pub fn foreign_key(
        &mut self,
        columns: &[&str],
        foreign_table: &str,
        foreign_columns: &[&str],
        on_delete: ForeignKeyAction,
        on_update: ForeignKeyAction,
    ) -> &mut Self {
        let foreign_table = self.db.full_name(foreign_table);
        let dialect = self.db.dialect();
        let declared = self.declared_mut();
        let mut fk = ForeignKey {
            table: declared.name.clone(),
            name: naming::foreign_key_name(dialect, &declared.name, &owned(columns)),
            columns: owned(columns),
            foreign_table,
            foreign_columns: owned(foreign_columns),
            on_delete,
            on_update,
        };

        let signature = fk.signature();
        match declared
            .foreign_keys
            .iter_mut()
            .find(|existing| existing.signature() == signature)
        {
            Some(existing) => {
                fk.name = existing.name.clone();
                *existing = fk;
            }
            None => declared.foreign_keys.push(fk),
        }
        self
    }

    pub fn drop_foreign_key(&mut self, columns: &[&str]) -> Result<&mut Self> {
        let mut signature = owned(columns);
        signature.sort();
        let found = self
            .declared()
            .map_or(false, |d| d.find_foreign_key(&signature).is_some());
        if !found {
            return Err(self.missing(&format!("foreign key on ({})", columns.join(", "))));
        }
        self.declared_mut()
            .foreign_keys
            .retain(|fk| fk.signature() != signature);
        Ok(self)
    }

    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.declared_mut().primary_keys = owned(columns);
        self
    }

    /// Rename the table. The prefix is applied to the new name.
    pub fn rename(&mut self, name: &str) -> &mut Self {
        let name = self.db.full_name(name);
        let declared = self.declared_mut();
        declared.name = name.clone();
        for index in &mut declared.indexes {
            index.table = name.clone();
        }
        for fk in &mut declared.foreign_keys {
            fk.table = name.clone();
        }
        self
    }

    /// Mark the table for removal on the next save
    pub fn declare_dropped(&mut self) -> &mut Self {
        self.declared = None;
        self
    }

    /// Diff the current state against the declared one
    pub fn change_set(&self) -> Result<ChangeSet> {
        if let Some(declared) = &self.declared {
            if !self.current.exists && declared.columns.is_empty() {
                return Err(Error::table_operation(
                    &declared.name,
                    "cannot create a table without columns",
                ));
            }
        }
        diff_table(
            &self.current,
            self.declared.as_ref(),
            &self.renames,
            self.db.handler(),
        )
    }

    /// Statements a save in `mode` would run, without running them
    pub fn render(&self, mode: SaveMode) -> Result<Vec<Statement>> {
        let operations = self.change_set()?.select(mode);
        apply::render(&self.db, &self.current, &operations)
    }

    /// Apply the phases selected by `mode` and adopt the resulting state
    pub async fn save(&mut self, mode: SaveMode) -> Result<Vec<Statement>> {
        let operations = self.change_set()?.select(mode);
        if operations.is_empty() {
            debug!(table = self.name(), "nothing to save");
            return Ok(Vec::new());
        }

        let ApplyOutcome { table, statements, .. } =
            apply::apply(&self.db, &self.current, &operations).await?;
        self.current = table;
        if mode.structure {
            // renamed columns now exist under their new names
            self.renames.clear();
        }
        Ok(statements)
    }

    /// Re-read the live table and reset the declaration to it
    pub async fn refresh(&mut self) -> Result<()> {
        let name = self.name().to_string();
        self.current = self.db.analyzer().analyze_table(&name).await?;
        self.declared = Some(self.current.clone());
        self.renames.clear();
        Ok(())
    }

    /// Delete every row of the table
    pub async fn truncate(&self) -> Result<()> {
        if !self.current.exists {
            return Err(Error::table_operation(
                &self.current.name,
                "cannot truncate a table that does not exist",
            ));
        }
        for statement in self.db.handler().render_truncate(&self.current.name)? {
            self.db.run(&statement).await?;
        }
        Ok(())
    }

    /// State a save in `mode` would leave the table in
    pub fn simulate(&self, mode: SaveMode) -> Result<TableState> {
        let operations = self.change_set()?.select(mode);
        Ok(apply_operations(&self.current, &operations))
    }

    /// Take the simulated state as current, as if saved in `mode`
    pub(crate) fn adopt(&mut self, mode: SaveMode) -> Result<()> {
        self.current = self.simulate(mode)?;
        if mode.structure {
            self.renames.clear();
        }
        Ok(())
    }
}
