//! MySQL catalog reader, backed by `information_schema`

use async_trait::async_trait;

use crate::db::executor::Database;
use crate::dialect::{quoted_values, NativeColumn};
use crate::error::{Error, Result};
use crate::schema::types::{AbstractType, Column, DefaultValue, ForeignKey, Index};

use super::{
    build_column, foreign_keys_from_rows, indexes_from_rows, names_from_rows, parse_default, size_of,
    unquote, Analyzer,
};

/// MySQL schema analyzer
pub struct MySqlAnalyzer<'a> {
    pub(super) db: &'a Database,
}

impl<'a> MySqlAnalyzer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

/// MySQL reports literal defaults unquoted and expressions flagged through
/// `EXTRA`; MariaDB quotes literals and spells out `NULL`.
fn column_default(raw: Option<String>, extra: &str) -> Option<DefaultValue> {
    let raw = raw?;
    if extra.contains("default_generated") {
        return Some(DefaultValue::expression(raw));
    }
    if unquote(&raw).is_some() || raw.eq_ignore_ascii_case("null") {
        return parse_default(Some(&raw));
    }
    if raw.to_ascii_lowercase().starts_with("current_timestamp") {
        return Some(DefaultValue::expression(raw));
    }
    match raw.parse::<i64>() {
        Ok(int) => Some(DefaultValue::literal(int)),
        Err(_) => Some(DefaultValue::literal(raw)),
    }
}

#[async_trait]
impl<'a> Analyzer for MySqlAnalyzer<'a> {
    async fn table_names(&self) -> Result<Vec<String>> {
        let sql = r#"
            SELECT table_name AS table_name
            FROM information_schema.tables
            WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;
        let rows = self.db.query(sql, &[]).await?;
        Ok(names_from_rows(&rows, "table_name"))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = r#"
            SELECT table_name AS table_name
            FROM information_schema.tables
            WHERE table_schema = DATABASE() AND table_name = ?
        "#;
        Ok(!self.db.query(sql, &[table.into()]).await?.is_empty())
    }

    async fn analyze_columns(&self, table: &str) -> Result<Vec<Column>> {
        let sql = r#"
            SELECT
                column_name AS column_name,
                column_type AS column_type,
                is_nullable AS is_nullable,
                column_default AS column_default,
                character_maximum_length AS size,
                numeric_precision AS numeric_precision,
                numeric_scale AS numeric_scale,
                extra AS extra
            FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ?
            ORDER BY ordinal_position
        "#;
        let handler = self.db.handler();
        let rows = self.db.query(sql, &[table.into()]).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row
                .text("column_name")
                .ok_or_else(|| Error::introspection(table, "column row without a name"))?;
            let column_type = row.text("column_type").unwrap_or_default();
            let extra = row.text("extra").unwrap_or_default().to_ascii_lowercase();

            let mut native = NativeColumn::parse(&column_type);
            native.auto_increment = extra.contains("auto_increment");
            if native.data_type.ends_with("char") {
                native.size = size_of(row, "size").or(native.size);
            }
            if matches!(native.data_type.as_str(), "decimal" | "numeric") {
                native.precision = size_of(row, "numeric_precision").or(native.precision);
                native.scale = size_of(row, "numeric_scale").or(native.scale);
            }

            let mut column = build_column(
                handler,
                &name,
                &native,
                row.flag("is_nullable"),
                column_default(row.text("column_default"), &extra),
            );
            if column.abstract_type == AbstractType::Enum {
                column.enum_values = quoted_values(&column_type);
            }
            if column_type.contains("unsigned") {
                column.attributes.insert("unsigned".to_string(), "true".to_string());
            }
            columns.push(column);
        }
        Ok(columns)
    }

    async fn analyze_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let sql = r#"
            SELECT column_name AS column_name
            FROM information_schema.key_column_usage
            WHERE table_schema = DATABASE() AND table_name = ? AND constraint_name = 'PRIMARY'
            ORDER BY ordinal_position
        "#;
        let rows = self.db.query(sql, &[table.into()]).await?;
        Ok(names_from_rows(&rows, "column_name"))
    }

    /// Indexes MySQL creates implicitly for foreign keys carry the
    /// constraint's name and are left out.
    async fn analyze_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let sql = r#"
            SELECT
                s.index_name AS index_name,
                s.column_name AS column_name,
                s.non_unique = 0 AS is_unique,
                s.collation = 'D' AS is_descending
            FROM information_schema.statistics s
            WHERE s.table_schema = DATABASE() AND s.table_name = ? AND s.index_name <> 'PRIMARY'
              AND NOT EXISTS (
                SELECT 1 FROM information_schema.table_constraints tc
                WHERE tc.table_schema = s.table_schema AND tc.table_name = s.table_name
                  AND tc.constraint_name = s.index_name AND tc.constraint_type = 'FOREIGN KEY'
              )
            ORDER BY s.index_name, s.seq_in_index
        "#;
        let rows = self.db.query(sql, &[table.into()]).await?;
        Ok(indexes_from_rows(table, &rows))
    }

    async fn analyze_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let sql = r#"
            SELECT
                kcu.constraint_name AS constraint_name,
                kcu.column_name AS column_name,
                kcu.referenced_table_name AS foreign_table,
                kcu.referenced_column_name AS foreign_column,
                rc.delete_rule AS delete_rule,
                rc.update_rule AS update_rule
            FROM information_schema.key_column_usage kcu
            JOIN information_schema.referential_constraints rc
              ON rc.constraint_schema = kcu.constraint_schema AND rc.constraint_name = kcu.constraint_name
            WHERE kcu.table_schema = DATABASE() AND kcu.table_name = ?
              AND kcu.referenced_table_name IS NOT NULL
            ORDER BY kcu.constraint_name, kcu.ordinal_position
        "#;
        let rows = self.db.query(sql, &[table.into()]).await?;
        Ok(foreign_keys_from_rows(table, &rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn mysql_and_mariadb_default_spellings() {
        assert_eq!(column_default(Some("abc".into()), ""), Some(DefaultValue::literal("abc")));
        assert_eq!(column_default(Some("'abc'".into()), ""), Some(DefaultValue::literal("abc")));
        assert_eq!(column_default(Some("0".into()), ""), Some(DefaultValue::Literal(Value::Int(0))));
        assert_eq!(column_default(Some("NULL".into()), ""), Some(DefaultValue::Null));
        assert_eq!(
            column_default(Some("CURRENT_TIMESTAMP".into()), "default_generated"),
            Some(DefaultValue::expression("CURRENT_TIMESTAMP"))
        );
        assert_eq!(
            column_default(Some("current_timestamp()".into()), ""),
            Some(DefaultValue::expression("current_timestamp()"))
        );
        assert_eq!(column_default(None, ""), None);
    }
}
