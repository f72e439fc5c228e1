//! Structural comparison of schema elements
//!
//! Pure functions with documented tolerances. They never fail: anything that
//! cannot be normalised is compared verbatim.

use std::collections::BTreeSet;

use crate::db::driver::Value;
use crate::schema::types::{AbstractType, Column, DefaultValue, ForeignKey, Index};

/// Dialect-dependent comparison switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComparePolicy {
    /// Enum value order is significant (native enums)
    pub enum_order_matters: bool,
}

/// A column attribute that differs between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnAttribute {
    Name,
    Type,
    Size,
    Precision,
    EnumValues,
    Nullability,
    Default,
}

impl ColumnAttribute {
    /// Attributes that change the physical storage of a column
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ColumnAttribute::Type
                | ColumnAttribute::Size
                | ColumnAttribute::Precision
                | ColumnAttribute::EnumValues
        )
    }
}

/// List every attribute that differs, in a fixed order.
///
/// The name is included so callers can detect renames; [`columns_equal`]
/// ignores it.
pub fn column_differences(current: &Column, declared: &Column, policy: ComparePolicy) -> Vec<ColumnAttribute> {
    let mut diffs = Vec::new();

    if current.name != declared.name {
        diffs.push(ColumnAttribute::Name);
    }
    if current.abstract_type != declared.abstract_type {
        diffs.push(ColumnAttribute::Type);
    }
    if declared.abstract_type.carries_size() && effective_size(current) != effective_size(declared) {
        diffs.push(ColumnAttribute::Size);
    }
    if declared.abstract_type == AbstractType::Decimal
        && (current.precision != declared.precision || current.scale.unwrap_or(0) != declared.scale.unwrap_or(0))
    {
        diffs.push(ColumnAttribute::Precision);
    }
    if declared.abstract_type == AbstractType::Enum
        && !enum_values_equal(&current.enum_values, &declared.enum_values, policy)
    {
        diffs.push(ColumnAttribute::EnumValues);
    }
    if !declared.abstract_type.is_primary() && current.nullable != declared.nullable {
        diffs.push(ColumnAttribute::Nullability);
    }
    if !declared.abstract_type.is_primary()
        && !defaults_equal(declared.abstract_type, current.default.as_ref(), declared.default.as_ref())
    {
        diffs.push(ColumnAttribute::Default);
    }

    diffs
}

/// Column equality, name ignored
pub fn columns_equal(current: &Column, declared: &Column, policy: ComparePolicy) -> bool {
    column_differences(current, declared, policy)
        .iter()
        .all(|attr| *attr == ColumnAttribute::Name)
}

/// Index equality: same `(column, direction)` sequence and uniqueness
pub fn indexes_equal(a: &Index, b: &Index) -> bool {
    a.columns == b.columns && a.unique == b.unique
}

/// Foreign key equality: local column set, target table, target column set
/// and both referential actions
pub fn foreign_keys_equal(a: &ForeignKey, b: &ForeignKey) -> bool {
    a.signature() == b.signature()
        && a.foreign_table == b.foreign_table
        && as_set(&a.foreign_columns) == as_set(&b.foreign_columns)
        && a.on_delete == b.on_delete
        && a.on_update == b.on_update
}

fn effective_size(column: &Column) -> Option<u32> {
    column.size.or_else(|| column.abstract_type.default_size())
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

fn enum_values_equal(a: &[String], b: &[String], policy: ComparePolicy) -> bool {
    if policy.enum_order_matters {
        a == b
    } else {
        a.len() == b.len() && as_set(a) == as_set(b)
    }
}

/// Default equality. Unset and `NULL` are the same thing; expressions are
/// compared by their SQL text, so `NOW()` and `CURRENT_TIMESTAMP` differ.
pub fn defaults_equal(ty: AbstractType, a: Option<&DefaultValue>, b: Option<&DefaultValue>) -> bool {
    let a = a.filter(|d| !d.is_null());
    let b = b.filter(|d| !d.is_null());

    match (a, b) {
        (None, None) => true,
        (Some(DefaultValue::Literal(x)), Some(DefaultValue::Literal(y))) => literals_equal(ty, x, y),
        (Some(x), Some(y)) => match (default_text(x), default_text(y)) {
            (Some(x), Some(y)) => x.trim().eq_ignore_ascii_case(y.trim()),
            _ => false,
        },
        _ => false,
    }
}

fn default_text(default: &DefaultValue) -> Option<String> {
    match default {
        DefaultValue::Null => None,
        DefaultValue::Literal(value) => value.as_text(),
        DefaultValue::Expression(sql) => Some(sql.clone()),
    }
}

fn literals_equal(ty: AbstractType, a: &Value, b: &Value) -> bool {
    if ty == AbstractType::Boolean {
        if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
            return x == y;
        }
    }
    let (Some(x), Some(y)) = (a.as_text(), b.as_text()) else {
        return false;
    };
    if ty.is_numeric() {
        if let (Ok(x), Ok(y)) = (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
            return x == y;
        }
    }
    x == y
}
