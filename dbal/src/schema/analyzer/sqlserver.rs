//! SQL Server catalog reader, backed by the `sys.*` views

use async_trait::async_trait;

use crate::db::driver::{Row, Value};
use crate::db::executor::Database;
use crate::dialect::{NativeColumn, DEFAULT_CONSTRAINT};
use crate::error::{Error, Result};
use crate::schema::types::{Column, ForeignKey, Index};

use super::{
    apply_enum_check, build_column, enum_checks_from_rows, foreign_keys_from_rows, indexes_from_rows,
    names_from_rows, parse_default, size_of, Analyzer,
};

/// SQL Server schema analyzer
pub struct SqlServerAnalyzer<'a> {
    pub(super) db: &'a Database,
}

impl<'a> SqlServerAnalyzer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

/// Character length of a `sys.columns` row; `max` types report -1
fn character_length(data_type: &str, row: &Row) -> Option<u32> {
    let bytes = size_of(row, "max_length")?;
    if data_type.starts_with('n') {
        Some(bytes / 2)
    } else {
        Some(bytes)
    }
}

fn native_column(row: &Row, has_enum_check: bool) -> NativeColumn {
    let data_type = row.text("data_type").unwrap_or_default().to_ascii_lowercase();
    let mut native = NativeColumn {
        full_type: data_type.clone(),
        data_type,
        auto_increment: row.flag("is_identity"),
        has_enum_check,
        ..Default::default()
    };

    match native.data_type.as_str() {
        "varchar" | "nvarchar" | "char" | "nchar" | "varbinary" | "binary" => {
            native.size = character_length(&native.data_type, row);
            native.full_type = match native.size {
                Some(size) => format!("{}({})", native.data_type, size),
                None => format!("{}(max)", native.data_type),
            };
        }
        "decimal" | "numeric" => {
            native.precision = size_of(row, "precision");
            native.scale = size_of(row, "scale");
        }
        _ => {}
    }
    native
}

#[async_trait]
impl<'a> Analyzer for SqlServerAnalyzer<'a> {
    async fn table_names(&self) -> Result<Vec<String>> {
        let sql = "SELECT t.name AS table_name FROM sys.tables t WHERE t.is_ms_shipped = 0 ORDER BY t.name";
        let rows = self.db.query(sql, &[]).await?;
        Ok(names_from_rows(&rows, "table_name"))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = "SELECT t.name AS table_name FROM sys.tables t WHERE t.object_id = OBJECT_ID(@P1)";
        Ok(!self.db.query(sql, &[table.into()]).await?.is_empty())
    }

    async fn analyze_columns(&self, table: &str) -> Result<Vec<Column>> {
        let params = [Value::from(table)];
        let sql = r#"
            SELECT
                c.name AS column_name,
                ty.name AS data_type,
                c.max_length AS max_length,
                c.precision AS precision,
                c.scale AS scale,
                c.is_nullable AS is_nullable,
                c.is_identity AS is_identity,
                dc.name AS default_name,
                dc.definition AS column_default
            FROM sys.columns c
            JOIN sys.types ty ON ty.user_type_id = c.user_type_id
            LEFT JOIN sys.default_constraints dc ON dc.object_id = c.default_object_id
            WHERE c.object_id = OBJECT_ID(@P1)
            ORDER BY c.column_id
        "#;
        let rows = self.db.query(sql, &params).await?;

        let checks_sql = r#"
            SELECT
                cc.name AS constraint_name,
                c.name AS column_name,
                cc.definition AS definition
            FROM sys.check_constraints cc
            JOIN sys.columns c ON c.object_id = cc.parent_object_id AND c.column_id = cc.parent_column_id
            WHERE cc.parent_object_id = OBJECT_ID(@P1)
        "#;
        let checks = enum_checks_from_rows(&self.db.query(checks_sql, &params).await?);

        let handler = self.db.handler();
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row
                .text("column_name")
                .ok_or_else(|| Error::introspection(table, "column row without a name"))?;
            let native = native_column(row, checks.contains_key(&name));

            let mut column = build_column(
                handler,
                &name,
                &native,
                row.flag("is_nullable"),
                parse_default(row.text("column_default").as_deref()),
            );
            if let Some(constraint) = row.text("default_name") {
                column.attributes.insert(DEFAULT_CONSTRAINT.to_string(), constraint);
            }
            apply_enum_check(&mut column, checks.get(&name));
            columns.push(column);
        }
        Ok(columns)
    }

    async fn analyze_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let sql = r#"
            SELECT c.name AS column_name
            FROM sys.indexes i
            JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.is_primary_key = 1
            ORDER BY ic.key_ordinal
        "#;
        let rows = self.db.query(sql, &[table.into()]).await?;
        Ok(names_from_rows(&rows, "column_name"))
    }

    async fn analyze_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let sql = r#"
            SELECT
                i.name AS index_name,
                c.name AS column_name,
                i.is_unique AS is_unique,
                ic.is_descending_key AS is_descending
            FROM sys.indexes i
            JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.is_primary_key = 0 AND i.type > 0
              AND ic.is_included_column = 0
            ORDER BY i.name, ic.key_ordinal
        "#;
        let rows = self.db.query(sql, &[table.into()]).await?;
        Ok(indexes_from_rows(table, &rows))
    }

    async fn analyze_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT
                fk.name AS constraint_name,
                pc.name AS column_name,
                rt.name AS foreign_table,
                rc.name AS foreign_column,
                fk.delete_referential_action_desc AS delete_rule,
                fk.update_referential_action_desc AS update_rule
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
            JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id
            JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
            WHERE fk.parent_object_id = OBJECT_ID(@P1)
            ORDER BY fk.name, fkc.constraint_column_id
        "#;
        let rows = self.db.query(sql, &[table.into()]).await?;
        Ok(foreign_keys_from_rows(table, &rows))
    }
}
