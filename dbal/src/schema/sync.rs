//! Multi-table synchronisation
//!
//! Tables are ordered by their declared foreign keys and saved in three
//! passes: removed foreign keys first, then structure (drops in reverse
//! dependency order, creates and alterations in dependency order), then new
//! foreign keys once every table exists. Cycles need no special handling:
//! tables are created without their foreign keys, so the last pass closes
//! any loop.

use std::collections::HashSet;
use tracing::{info, warn};

use crate::db::driver::Statement;
use crate::error::{Error, Result};
use crate::schema::builder::TableSchema;
use crate::schema::diff::SaveMode;

/// What a synchronisation did
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Tables that ran at least one statement
    pub applied: Vec<String>,
    /// Tables abandoned on a table-scoped error
    pub skipped: Vec<(String, Error)>,
    /// Every statement, in execution order
    pub statements: Vec<Statement>,
}

impl SyncReport {
    pub fn is_skipped(&self, table: &str) -> bool {
        self.skipped.iter().any(|(name, _)| name == table)
    }
}

/// Synchronisation orchestrator over a set of declared tables
#[derive(Debug, Default)]
pub struct Synchronizer {
    tables: Vec<TableSchema>,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, table: TableSchema) -> &mut Self {
        self.tables.push(table);
        self
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn into_tables(self) -> Vec<TableSchema> {
        self.tables
    }

    /// Indexes of referenced tables that are part of this sync
    fn dependencies(&self, i: usize) -> Vec<usize> {
        let table = &self.tables[i];
        let state = table.declared().unwrap_or(table.current());
        state
            .dependencies()
            .iter()
            .filter_map(|name| {
                self.tables.iter().position(|t| {
                    t.name() == name.as_str() || t.current().name == name.as_str()
                })
            })
            .filter(|&j| j != i)
            .collect()
    }

    /// Table indexes, referenced tables first. Insertion order breaks ties;
    /// an edge closing a cycle is ignored.
    pub fn order(&self) -> Vec<usize> {
        fn visit(sync: &Synchronizer, i: usize, visiting: &mut HashSet<usize>, done: &mut Vec<usize>) {
            if done.contains(&i) || !visiting.insert(i) {
                return;
            }
            for dep in sync.dependencies(i) {
                visit(sync, dep, visiting, done);
            }
            visiting.remove(&i);
            done.push(i);
        }

        let mut done = Vec::with_capacity(self.tables.len());
        let mut visiting = HashSet::new();
        for i in 0..self.tables.len() {
            visit(self, i, &mut visiting, &mut done);
        }
        done
    }

    /// Saves in execution order
    fn passes(&self) -> Vec<(usize, SaveMode)> {
        let order = self.order();
        let dropped = |i: usize| self.tables[i].declared().is_none();
        let mut passes = Vec::new();

        passes.extend(order.iter().map(|&i| (i, SaveMode::DROP_FOREIGN_KEYS)));
        passes.extend(
            order
                .iter()
                .rev()
                .filter(|&&i| dropped(i))
                .map(|&i| (i, SaveMode::STRUCTURE_ONLY)),
        );
        passes.extend(
            order
                .iter()
                .filter(|&&i| !dropped(i))
                .map(|&i| (i, SaveMode::STRUCTURE_ONLY)),
        );
        passes.extend(
            order
                .iter()
                .filter(|&&i| !dropped(i))
                .map(|&i| (i, SaveMode::CREATE_FOREIGN_KEYS)),
        );
        passes
    }

    fn record(
        report: &mut SyncReport,
        skipped: &mut HashSet<usize>,
        i: usize,
        name: &str,
        result: Result<Vec<Statement>>,
    ) -> Result<()> {
        match result {
            Ok(statements) => {
                if !statements.is_empty() && !report.applied.iter().any(|t| t == name) {
                    report.applied.push(name.to_string());
                }
                report.statements.extend(statements);
                Ok(())
            }
            Err(err) if err.is_table_scoped() => {
                warn!(table = name, error = %err, "table skipped");
                skipped.insert(i);
                report.skipped.push((name.to_string(), err));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Statements a run would execute, computed without touching any
    /// database
    pub fn plan(&self) -> Result<SyncReport> {
        let mut tables = self.tables.clone();
        let mut report = SyncReport::default();
        let mut skipped = HashSet::new();

        for (i, mode) in self.passes() {
            if skipped.contains(&i) {
                continue;
            }
            let table = &mut tables[i];
            let name = table.name().to_string();
            let result = table
                .render(mode)
                .and_then(|statements| table.adopt(mode).map(|_| statements));
            Self::record(&mut report, &mut skipped, i, &name, result)?;
        }
        Ok(report)
    }

    /// Apply every table. A table-scoped error skips that table; any other
    /// error stops the sync.
    pub async fn run(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut skipped = HashSet::new();

        for (i, mode) in self.passes() {
            if skipped.contains(&i) {
                continue;
            }
            let table = &mut self.tables[i];
            let name = table.name().to_string();
            let result = table.save(mode).await;
            Self::record(&mut report, &mut skipped, i, &name, result)?;
        }

        info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            statements = report.statements.len(),
            "synchronisation finished"
        );
        Ok(report)
    }
}
