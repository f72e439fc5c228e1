//! Schema module
//!
//! The element model, its comparator and diff engine, catalog analyzers, the
//! declarative table API and the multi-table synchroniser.

pub mod analyzer;
pub mod builder;
pub mod compare;
pub mod diff;
pub mod sync;
pub mod types;

// Re-export key types
pub use analyzer::{Analyzer, SchemaAnalyzer};
pub use builder::TableSchema;
pub use compare::{columns_equal, foreign_keys_equal, indexes_equal, ColumnAttribute, ComparePolicy};
pub use diff::{diff_table, ChangeSet, ColumnRename, Operation, OperationKind, Phase, SaveMode};
pub use sync::{SyncReport, Synchronizer};
pub use types::{
    AbstractType, Column, DefaultValue, ForeignKey, ForeignKeyAction, Index, IndexColumn, SortDirection,
    TableState,
};
