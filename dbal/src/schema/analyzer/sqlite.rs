//! SQLite catalog reader
//!
//! Columns, indexes and foreign keys come from the `PRAGMA` table functions.
//! Enum checks and `AUTOINCREMENT` are only visible in the stored CREATE
//! statement, so that is parsed as well.

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::db::driver::Row;
use crate::db::executor::Database;
use crate::dialect::{quoted_values, DialectKind, NativeColumn};
use crate::error::{Error, Result};
use crate::schema::types::{Column, ForeignKey, ForeignKeyAction, Index, IndexColumn};
use crate::utils::naming;

use super::{apply_enum_check, build_column, names_from_rows, parse_default, Analyzer, EnumCheck};

/// SQLite schema analyzer
pub struct SqliteAnalyzer<'a> {
    pub(super) db: &'a Database,
}

impl<'a> SqliteAnalyzer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    async fn pragma(&self, pragma: &str, target: &str) -> Result<Vec<Row>> {
        let sql = format!("PRAGMA {}({})", pragma, self.db.quote_identifier(target));
        self.db.query(&sql, &[]).await
    }

    async fn create_statement(&self, table: &str) -> Result<String> {
        let rows = self
            .db
            .query(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[table.into()],
            )
            .await?;
        Ok(rows.first().and_then(|row| row.text("sql")).unwrap_or_default())
    }
}

/// `[CONSTRAINT name] CHECK (col IN (...))` clauses of a CREATE statement
fn enum_checks(create_sql: &str) -> HashMap<String, EnumCheck> {
    static CHECK_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?i)(?:CONSTRAINT\s+("(?:[^"]|"")+"|\w+)\s+)?CHECK\s*\(\s*["`\[]?(\w+)["`\]]?\s+IN\s*\(([^)]*)\)\s*\)"#,
        )
        .expect("valid check regex")
    });

    let mut checks = HashMap::new();
    for caps in CHECK_RE.captures_iter(create_sql) {
        let column = caps[2].to_string();
        let constraint = caps
            .get(1)
            .map(|m| m.as_str().trim_matches('"').replace("\"\"", "\""))
            .unwrap_or_default();
        let values = quoted_values(&caps[3]);
        if !values.is_empty() {
            checks.insert(column, EnumCheck { constraint, values });
        }
    }
    checks
}

fn is_autoincrement(create_sql: &str) -> bool {
    create_sql.to_ascii_uppercase().contains("AUTOINCREMENT")
}

#[async_trait]
impl<'a> Analyzer for SqliteAnalyzer<'a> {
    async fn table_names(&self) -> Result<Vec<String>> {
        let rows = self
            .db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        Ok(names_from_rows(&rows, "name"))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self
            .db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[table.into()],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn analyze_columns(&self, table: &str) -> Result<Vec<Column>> {
        let handler = self.db.handler();
        let create_sql = self.create_statement(table).await?;
        let checks = enum_checks(&create_sql);
        let info = self.pragma("table_info", table).await?;

        // Only a sole INTEGER primary key can alias the rowid
        let key_count = info.iter().filter(|row| row.int("pk").unwrap_or(0) > 0).count();
        let rowid_alias = key_count == 1 && is_autoincrement(&create_sql);

        let mut columns = Vec::with_capacity(info.len());
        for row in &info {
            let name = row
                .text("name")
                .ok_or_else(|| Error::introspection(table, "table_info row without a column name"))?;
            let mut native = NativeColumn::parse(&row.text("type").unwrap_or_default());
            native.auto_increment =
                rowid_alias && row.int("pk").unwrap_or(0) > 0 && native.data_type == "integer";
            native.has_enum_check = checks.contains_key(&name);

            let mut column = build_column(
                handler,
                &name,
                &native,
                !row.flag("notnull"),
                parse_default(row.text("dflt_value").as_deref()),
            );
            apply_enum_check(&mut column, checks.get(&name));
            columns.push(column);
        }
        Ok(columns)
    }

    async fn analyze_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let mut keys: Vec<(i64, String)> = self
            .pragma("table_info", table)
            .await?
            .iter()
            .filter_map(|row| {
                let position = row.int("pk").filter(|pk| *pk > 0)?;
                Some((position, row.text("name")?))
            })
            .collect();
        keys.sort();
        Ok(keys.into_iter().map(|(_, name)| name).collect())
    }

    async fn analyze_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let mut indexes = Vec::new();
        for row in self.pragma("index_list", table).await? {
            // Skip indexes backing PRIMARY KEY and UNIQUE constraints
            if row.text("origin").as_deref() != Some("c") {
                continue;
            }
            let Some(name) = row.text("name") else {
                continue;
            };

            let columns = self
                .pragma("index_xinfo", &name)
                .await?
                .iter()
                .filter(|info| info.flag("key"))
                .filter_map(|info| {
                    let column = info.text("name")?;
                    Some(if info.flag("desc") {
                        IndexColumn::desc(&column)
                    } else {
                        IndexColumn::asc(&column)
                    })
                })
                .collect();
            indexes.push(Index::new(table, &name, columns, row.flag("unique")));
        }
        Ok(indexes)
    }

    /// SQLite keeps no foreign key names; a deterministic one is derived
    /// from the table and columns so repeated reads agree.
    async fn analyze_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let mut grouped: IndexMap<i64, ForeignKey> = IndexMap::new();
        for row in self.pragma("foreign_key_list", table).await? {
            let id = row.int("id").unwrap_or(0);
            let fk = grouped.entry(id).or_insert_with(|| ForeignKey {
                table: table.to_string(),
                name: String::new(),
                columns: Vec::new(),
                foreign_table: row.text("table").unwrap_or_default(),
                foreign_columns: Vec::new(),
                on_delete: ForeignKeyAction::parse(&row.text("on_delete").unwrap_or_default()),
                on_update: ForeignKeyAction::parse(&row.text("on_update").unwrap_or_default()),
            });
            fk.columns.push(row.text("from").unwrap_or_default());
            fk.foreign_columns.push(row.text("to").unwrap_or_default());
        }

        Ok(grouped
            .into_values()
            .map(|mut fk| {
                fk.name = naming::foreign_key_name(DialectKind::Sqlite, table, &fk.columns);
                fk
            })
            .collect())
    }
}
