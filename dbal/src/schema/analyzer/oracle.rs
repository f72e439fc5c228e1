//! Oracle catalog reader, backed by the `all_*` dictionary views
//!
//! Owners resolve against the configured search path, `$user` standing for
//! the connecting user. Without one the session's current schema is used.

use async_trait::async_trait;

use crate::db::driver::{Row, Value};
use crate::db::executor::Database;
use crate::dialect::NativeColumn;
use crate::error::{Error, Result};
use crate::schema::types::{Column, ForeignKey, Index};
use crate::utils::naming;

use super::{
    apply_enum_check, build_column, enum_checks_from_rows, foreign_keys_from_rows, indexes_from_rows,
    names_from_rows, parse_default, size_of, Analyzer,
};

/// Oracle schema analyzer
pub struct OracleAnalyzer<'a> {
    pub(super) db: &'a Database,
}

impl<'a> OracleAnalyzer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    async fn owners(&self) -> Result<Vec<String>> {
        let path = self.db.search_path();
        if !path.is_empty() {
            return Ok(path);
        }
        let rows = self
            .db
            .query("SELECT SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA') AS owner FROM dual", &[])
            .await?;
        Ok(names_from_rows(&rows, "owner"))
    }

    /// `(owner, table)` of an existing table, `None` when absent
    async fn resolve(&self, table: &str) -> Result<Option<(String, String)>> {
        let (owner, name) = naming::split_qualified(table);
        let candidates = match owner {
            Some(owner) => vec![owner.to_string()],
            None => self.owners().await?,
        };

        let sql = "SELECT table_name FROM all_tables WHERE owner = UPPER(:1) AND table_name = :2";
        for owner in candidates {
            let rows = self.db.query(sql, &[owner.clone().into(), name.into()]).await?;
            if !rows.is_empty() {
                return Ok(Some((owner, name.to_string())));
            }
        }
        Ok(None)
    }

    async fn require(&self, table: &str) -> Result<[Value; 2]> {
        let (owner, name) = self
            .resolve(table)
            .await?
            .ok_or_else(|| Error::introspection(table, "table not found for any owner on the search path"))?;
        Ok([owner.into(), name.into()])
    }
}

fn native_column(row: &Row, has_enum_check: bool) -> NativeColumn {
    let mut native = NativeColumn::parse(&row.text("data_type").unwrap_or_default());
    native.auto_increment = row.flag("identity_column");
    native.has_enum_check = has_enum_check;
    match native.data_type.as_str() {
        "number" | "float" => {
            native.precision = size_of(row, "data_precision");
            native.scale = size_of(row, "data_scale");
        }
        "varchar2" | "nvarchar2" | "varchar" | "char" | "nchar" => {
            native.size = size_of(row, "char_length");
        }
        "raw" => native.size = size_of(row, "data_length"),
        _ => {}
    }
    native
}

#[async_trait]
impl<'a> Analyzer for OracleAnalyzer<'a> {
    async fn table_names(&self) -> Result<Vec<String>> {
        let Some(owner) = self.owners().await?.into_iter().next() else {
            return Ok(Vec::new());
        };
        let rows = self
            .db
            .query(
                "SELECT table_name FROM all_tables WHERE owner = UPPER(:1) ORDER BY table_name",
                &[owner.into()],
            )
            .await?;
        Ok(names_from_rows(&rows, "table_name"))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.resolve(table).await?.is_some())
    }

    async fn analyze_columns(&self, table: &str) -> Result<Vec<Column>> {
        let params = self.require(table).await?;
        let sql = r#"
            SELECT
                column_name, data_type, data_length, char_length, data_precision, data_scale,
                nullable, data_default, identity_column
            FROM all_tab_columns
            WHERE owner = UPPER(:1) AND table_name = :2
            ORDER BY column_id
        "#;
        let rows = self.db.query(sql, &params).await?;

        let checks_sql = r#"
            SELECT c.constraint_name, cc.column_name, c.search_condition_vc AS definition
            FROM all_constraints c
            JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name
            WHERE c.owner = UPPER(:1) AND c.table_name = :2 AND c.constraint_type = 'C'
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
                row.flag("nullable"),
                parse_default(row.text("data_default").as_deref()),
            );
            apply_enum_check(&mut column, checks.get(&name));
            columns.push(column);
        }
        Ok(columns)
    }

    async fn analyze_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let params = self.require(table).await?;
        let sql = r#"
            SELECT cc.column_name
            FROM all_constraints c
            JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name
            WHERE c.owner = UPPER(:1) AND c.table_name = :2 AND c.constraint_type = 'P'
            ORDER BY cc.position
        "#;
        let rows = self.db.query(sql, &params).await?;
        Ok(names_from_rows(&rows, "column_name"))
    }

    async fn analyze_indexes(&self, table: &str) -> Result<Vec<Index>> {
        let params = self.require(table).await?;
        let sql = r#"
            SELECT
                i.index_name,
                ic.column_name,
                CASE WHEN i.uniqueness = 'UNIQUE' THEN 1 ELSE 0 END AS is_unique,
                CASE WHEN ic.descend = 'DESC' THEN 1 ELSE 0 END AS is_descending
            FROM all_indexes i
            JOIN all_ind_columns ic ON ic.index_owner = i.owner AND ic.index_name = i.index_name
            WHERE i.table_owner = UPPER(:1) AND i.table_name = :2
              AND NOT EXISTS (
                SELECT 1 FROM all_constraints c
                WHERE c.owner = i.owner AND c.index_name = i.index_name AND c.constraint_type = 'P'
              )
            ORDER BY i.index_name, ic.column_position
        "#;
        let rows = self.db.query(sql, &params).await?;
        Ok(indexes_from_rows(table, &rows))
    }

    async fn analyze_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let params = self.require(table).await?;
        let sql = r#"
            SELECT
                c.constraint_name,
                cc.column_name,
                rc.table_name AS foreign_table,
                rcc.column_name AS foreign_column,
                c.delete_rule,
                'NO ACTION' AS update_rule
            FROM all_constraints c
            JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name
            JOIN all_constraints rc ON rc.owner = c.r_owner AND rc.constraint_name = c.r_constraint_name
            JOIN all_cons_columns rcc ON rcc.owner = rc.owner AND rcc.constraint_name = rc.constraint_name
              AND rcc.position = cc.position
            WHERE c.owner = UPPER(:1) AND c.table_name = :2 AND c.constraint_type = 'R'
            ORDER BY c.constraint_name, cc.position
        "#;
        let rows = self.db.query(sql, &params).await?;
        Ok(foreign_keys_from_rows(table, &rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Handler, OracleHandler};
    use crate::schema::types::AbstractType;
    use pretty_assertions::assert_eq;

    #[test]
    fn number_columns_take_dictionary_precision() {
        let row = Row::from_pairs([
            ("data_type", Value::from("NUMBER")),
            ("data_precision", Value::Int(19)),
            ("data_scale", Value::Int(0)),
            ("identity_column", Value::from("YES")),
        ]);
        let native = native_column(&row, false);
        assert_eq!(native.precision, Some(19));
        assert_eq!(OracleHandler.abstract_type(&native), AbstractType::BigPrimary);
    }
}
