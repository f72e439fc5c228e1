//! Schema element model
//!
//! Dialect-neutral snapshots of tables, columns, indexes and foreign keys.
//! A table is tracked as two snapshots during synchronisation: the *current*
//! state read from the database and the *declared* state built by the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::db::driver::Value;
use crate::error::Error;

/// Dialect-neutral column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AbstractType {
    Primary,
    BigPrimary,
    Enum,
    String,
    Text,
    Integer,
    BigInteger,
    Boolean,
    Float,
    Decimal,
    Date,
    Time,
    Datetime,
    Timestamp,
    Binary,
    Json,
    Uuid,
}

impl AbstractType {
    pub const ALL: [AbstractType; 17] = [
        AbstractType::Primary,
        AbstractType::BigPrimary,
        AbstractType::Enum,
        AbstractType::String,
        AbstractType::Text,
        AbstractType::Integer,
        AbstractType::BigInteger,
        AbstractType::Boolean,
        AbstractType::Float,
        AbstractType::Decimal,
        AbstractType::Date,
        AbstractType::Time,
        AbstractType::Datetime,
        AbstractType::Timestamp,
        AbstractType::Binary,
        AbstractType::Json,
        AbstractType::Uuid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AbstractType::Primary => "primary",
            AbstractType::BigPrimary => "bigPrimary",
            AbstractType::Enum => "enum",
            AbstractType::String => "string",
            AbstractType::Text => "text",
            AbstractType::Integer => "integer",
            AbstractType::BigInteger => "bigInteger",
            AbstractType::Boolean => "boolean",
            AbstractType::Float => "float",
            AbstractType::Decimal => "decimal",
            AbstractType::Date => "date",
            AbstractType::Time => "time",
            AbstractType::Datetime => "datetime",
            AbstractType::Timestamp => "timestamp",
            AbstractType::Binary => "binary",
            AbstractType::Json => "json",
            AbstractType::Uuid => "uuid",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, AbstractType::Primary | AbstractType::BigPrimary)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            AbstractType::Primary
                | AbstractType::BigPrimary
                | AbstractType::Integer
                | AbstractType::BigInteger
                | AbstractType::Float
                | AbstractType::Decimal
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            AbstractType::Date | AbstractType::Time | AbstractType::Datetime | AbstractType::Timestamp
        )
    }

    /// Large object types: no inline literal defaults on some engines.
    pub fn is_large_object(&self) -> bool {
        matches!(self, AbstractType::Text | AbstractType::Binary | AbstractType::Json)
    }

    /// Types whose size attribute takes part in comparison.
    pub fn carries_size(&self) -> bool {
        matches!(self, AbstractType::String)
    }

    /// Default size applied when a sized type is declared without one.
    pub fn default_size(&self) -> Option<u32> {
        match self {
            AbstractType::String => Some(255),
            _ => None,
        }
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AbstractType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AbstractType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::ConfigError(format!("Unknown abstract type: {}", s)))
    }
}

/// Column default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Explicit `DEFAULT NULL`
    Null,
    /// Literal value, quoted or formatted by the dialect
    Literal(Value),
    /// SQL expression fragment rendered verbatim, e.g. `CURRENT_TIMESTAMP`
    Expression(String),
}

impl DefaultValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        DefaultValue::Literal(value.into())
    }

    pub fn expression(sql: impl Into<String>) -> Self {
        DefaultValue::Expression(sql.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DefaultValue::Null | DefaultValue::Literal(Value::Null))
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub abstract_type: AbstractType,
    /// Dialect-native type as reported or rendered, e.g. `character varying`
    pub internal_type: String,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub enum_values: Vec<String>,
    /// Dialect-specific extras (e.g. `unsigned`, `collation`)
    pub attributes: BTreeMap<String, String>,
}

impl Column {
    /// Create a new column with the given name and abstract type
    pub fn new(name: &str, abstract_type: AbstractType) -> Self {
        Self {
            name: name.to_string(),
            abstract_type,
            internal_type: String::new(),
            nullable: false,
            default: None,
            size: abstract_type.default_size(),
            precision: None,
            scale: None,
            enum_values: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether the column has a literal, non-empty default
    pub fn has_non_empty_literal_default(&self) -> bool {
        match &self.default {
            Some(DefaultValue::Literal(value)) => {
                value.as_text().map(|text| !text.is_empty()).unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Sort order of one indexed column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One `(column, direction)` pair of an index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub direction: SortDirection,
}

impl IndexColumn {
    pub fn asc(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

/// Represents an index
///
/// Names are frequently engine-generated, so indexes are matched by their
/// column list, never by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub table: String,
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
}

impl Index {
    pub fn new(table: &str, name: &str, columns: Vec<IndexColumn>, unique: bool) -> Self {
        Self {
            table: table.to_string(),
            name: name.to_string(),
            columns,
            unique,
        }
    }

    /// Ordered column names, the matching key of an index
    pub fn signature(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn involves(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }
}

/// Referential action of a foreign key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    Cascade,
    #[default]
    NoAction,
    SetNull,
    Restrict,
}

impl ForeignKeyAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyAction::Cascade => "CASCADE",
            ForeignKeyAction::NoAction => "NO ACTION",
            ForeignKeyAction::SetNull => "SET NULL",
            ForeignKeyAction::Restrict => "RESTRICT",
        }
    }

    /// Parse an engine-reported rule; unknown rules read as `NO ACTION`.
    pub fn parse(rule: &str) -> Self {
        match rule.trim().to_ascii_uppercase().replace('_', " ").as_str() {
            "CASCADE" => ForeignKeyAction::Cascade,
            "SET NULL" => ForeignKeyAction::SetNull,
            "RESTRICT" => ForeignKeyAction::Restrict,
            _ => ForeignKeyAction::NoAction,
        }
    }
}

/// Represents a foreign key constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKey {
    /// Sorted local columns, the matching key of a foreign key
    pub fn signature(&self) -> Vec<String> {
        let mut columns = self.columns.clone();
        columns.sort();
        columns
    }

    pub fn involves(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Aggregate snapshot of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    /// Full name, prefix included
    pub name: String,
    pub exists: bool,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub primary_keys: Vec<String>,
}

impl TableState {
    /// Create an empty, non-existent table state
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exists: false,
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Insert or replace a column, keeping its position when replacing
    pub fn upsert_column(&mut self, column: Column) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    pub fn find_index(&self, signature: &[String]) -> Option<&Index> {
        self.indexes.iter().find(|i| i.signature() == signature)
    }

    pub fn find_foreign_key(&self, signature: &[String]) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.signature() == signature)
    }

    /// Tables this one references through its foreign keys
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .foreign_keys
            .iter()
            .map(|fk| fk.foreign_table.clone())
            .filter(|t| t != &self.name)
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Copy of this state without foreign keys
    pub fn without_foreign_keys(&self) -> Self {
        Self {
            foreign_keys: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_type_names_round_trip() {
        for t in AbstractType::ALL {
            assert_eq!(t.as_str().parse::<AbstractType>().unwrap(), t);
        }
        assert!("varchar".parse::<AbstractType>().is_err());
    }

    #[test]
    fn string_columns_get_default_size() {
        assert_eq!(Column::new("name", AbstractType::String).size, Some(255));
        assert_eq!(Column::new("id", AbstractType::Integer).size, None);
    }

    #[test]
    fn foreign_key_signature_is_order_insensitive() {
        let fk = ForeignKey {
            table: "orders".into(),
            name: "fk".into(),
            columns: vec!["b".into(), "a".into()],
            foreign_table: "items".into(),
            foreign_columns: vec!["y".into(), "x".into()],
            on_delete: ForeignKeyAction::Cascade,
            on_update: ForeignKeyAction::NoAction,
        };
        assert_eq!(fk.signature(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn foreign_key_actions_parse_engine_spellings() {
        assert_eq!(ForeignKeyAction::parse("SET_NULL"), ForeignKeyAction::SetNull);
        assert_eq!(ForeignKeyAction::parse("cascade"), ForeignKeyAction::Cascade);
        assert_eq!(ForeignKeyAction::parse("NO ACTION"), ForeignKeyAction::NoAction);
        assert_eq!(ForeignKeyAction::parse("whatever"), ForeignKeyAction::NoAction);
    }

    #[test]
    fn upsert_keeps_column_position() {
        let mut table = TableState::new("users");
        table.upsert_column(Column::new("id", AbstractType::Primary));
        table.upsert_column(Column::new("name", AbstractType::String));
        table.upsert_column(Column::new("id", AbstractType::BigPrimary));
        assert_eq!(table.columns[0].abstract_type, AbstractType::BigPrimary);
        assert_eq!(table.columns.len(), 2);
    }
}
