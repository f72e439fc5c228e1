//! PostgreSQL catalog reader
//!
//! Unqualified table names resolve against the configured search path;
//! `information_schema` domains are cast to plain types so every driver can
//! decode them.

use async_trait::async_trait;

use crate::db::driver::Value;
use crate::db::executor::Database;
use crate::dialect::NativeColumn;
use crate::error::{Error, Result};
use crate::schema::types::{Column, ForeignKey, Index};
use crate::utils::naming;

use super::{
    apply_enum_check, build_column, enum_checks_from_rows, foreign_keys_from_rows, indexes_from_rows,
    names_from_rows, parse_default, size_of, Analyzer,
};

/// PostgreSQL schema analyzer
pub struct PostgresAnalyzer<'a> {
    pub(super) db: &'a Database,
}

impl<'a> PostgresAnalyzer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// `(schema, relation)` of an existing table, `None` when absent
    async fn resolve(&self, table: &str) -> Result<Option<(String, String)>> {
        let (schema, name) = naming::split_qualified(table);
        let candidates = match schema {
            Some(schema) => vec![schema.to_string()],
            None => self.db.search_path(),
        };

        let sql = r#"
            SELECT c.relname::text AS table_name
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')
        "#;
        for schema in candidates {
            let rows = self
                .db
                .query(sql, &[schema.clone().into(), name.into()])
                .await?;
            if !rows.is_empty() {
                return Ok(Some((schema, name.to_string())));
            }
        }
        Ok(None)
    }

    async fn require(&self, table: &str) -> Result<(String, String)> {
        self.resolve(table)
            .await?
            .ok_or_else(|| Error::introspection(table, "table not found on the search path"))
    }
}

#[async_trait]
impl<'a> Analyzer for PostgresAnalyzer<'a> {
    /// Tables of the first search path schema are listed unqualified,
    /// those of later schemas qualified
    async fn table_names(&self) -> Result<Vec<String>> {
        let sql = r#"
            SELECT c.relname::text AS table_name
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
            ORDER BY c.relname
        "#;
        let mut names = Vec::new();
        for (position, schema) in self.db.search_path().into_iter().enumerate() {
            let rows = self.db.query(sql, &[schema.clone().into()]).await?;
            for name in names_from_rows(&rows, "table_name") {
                names.push(if position == 0 {
                    name
                } else {
                    format!("{}.{}", schema, name)
                });
            }
        }
        Ok(names)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.resolve(table).await?.is_some())
    }

    async fn analyze_columns(&self, table: &str) -> Result<Vec<Column>> {
        let (schema, name) = self.require(table).await?;
        let params = [Value::from(schema), Value::from(name)];

        let sql = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default,
                character_maximum_length::int AS size,
                numeric_precision::int AS numeric_precision,
                numeric_scale::int AS numeric_scale,
                is_identity::text AS is_identity
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;
        let rows = self.db.query(sql, &params).await?;

        let checks_sql = r#"
            SELECT
                con.conname::text AS constraint_name,
                a.attname::text AS column_name,
                pg_catalog.pg_get_constraintdef(con.oid) AS definition
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = con.conkey[1]
            WHERE con.contype = 'c' AND n.nspname = $1 AND c.relname = $2
              AND array_length(con.conkey, 1) = 1
        "#;
        let checks = enum_checks_from_rows(&self.db.query(checks_sql, &params).await?);

        let handler = self.db.handler();
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let column_name = row
                .text("column_name")
                .ok_or_else(|| Error::introspection(table, "column row without a name"))?;
            let data_type = row.text("data_type").unwrap_or_default();
            let default = row.text("column_default");

            let native = NativeColumn {
                full_type: data_type.clone(),
                data_type,
                size: size_of(row, "size"),
                precision: size_of(row, "numeric_precision"),
                scale: size_of(row, "numeric_scale"),
                auto_increment: row.flag("is_identity")
                    || default
                        .as_deref()
                        .map_or(false, |d| d.to_ascii_lowercase().starts_with("nextval(")),
                has_enum_check: checks.contains_key(&column_name),
            };

            let mut column = build_column(
                handler,
                &column_name,
                &native,
                row.flag("is_nullable"),
                parse_default(default.as_deref()),
            );
            apply_enum_check(&mut column, checks.get(&column_name));
            columns.push(column);
        }
        Ok(columns)
    }

    async fn analyze_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let (schema, name) = self.require(table).await?;
        let sql = r#"
            SELECT a.attname::text AS column_name
            FROM pg_catalog.pg_index i
            JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
            WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2
            ORDER BY array_position(i.indkey::int2[], a.attnum)
        "#;
        let rows = self.db.query(sql, &[schema.into(), name.into()]).await?;
        Ok(names_from_rows(&rows, "column_name"))
    }

    /// Indexes owned by a UNIQUE or EXCLUDE constraint are left out; the
    /// engine refuses to drop them as plain indexes.
    async fn analyze_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let (schema, name) = self.require(table).await?;
        let sql = r#"
            SELECT
                ic.relname::text AS index_name,
                a.attname::text AS column_name,
                ix.indisunique AS is_unique,
                (ix.indoption[k.ord - 1] & 1) = 1 AS is_descending
            FROM pg_catalog.pg_index ix
            JOIN pg_catalog.pg_class c ON c.oid = ix.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_class ic ON ic.oid = ix.indexrelid
            CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1 AND c.relname = $2 AND NOT ix.indisprimary
              AND NOT EXISTS (
                SELECT 1 FROM pg_catalog.pg_constraint con WHERE con.conindid = ix.indexrelid
              )
            ORDER BY ic.relname, k.ord
        "#;
        let rows = self.db.query(sql, &[schema.into(), name.into()]).await?;
        Ok(indexes_from_rows(table, &rows))
    }

    async fn analyze_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let (schema, name) = self.require(table).await?;
        let sql = r#"
            SELECT
                con.conname::text AS constraint_name,
                a.attname::text AS column_name,
                CASE WHEN fn.nspname = n.nspname THEN fc.relname::text
                     ELSE fn.nspname || '.' || fc.relname END AS foreign_table,
                fa.attname::text AS foreign_column,
                CASE con.confdeltype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL'
                     WHEN 'r' THEN 'RESTRICT' ELSE 'NO ACTION' END AS delete_rule,
                CASE con.confupdtype WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL'
                     WHEN 'r' THEN 'RESTRICT' ELSE 'NO ACTION' END AS update_rule
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
            JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            JOIN pg_catalog.pg_attribute fa ON fa.attrelid = con.confrelid AND fa.attnum = k.fattnum
            WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
            ORDER BY con.conname, k.ord
        "#;
        let rows = self.db.query(sql, &[schema.into(), name.into()]).await?;
        Ok(foreign_keys_from_rows(table, &rows))
    }
}
