//! Table diff engine
//!
//! Computes the ordered change-set that turns a table's current state into
//! its declared state. Indexes and foreign keys are matched by column
//! signature, never by name, and every dependent index or foreign key of a
//! column under structural change is dropped before the alteration and
//! restored after it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::dialect::Handler;
use crate::error::{Error, Result};
use crate::schema::compare::{column_differences, foreign_keys_equal, indexes_equal};
use crate::schema::types::{Column, ForeignKey, Index, TableState};

/// One structural change
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateTable(TableState),
    DropTable(TableState),
    RenameTable { from: String, to: String },
    AddColumn(Column),
    DropColumn(Column),
    /// Same logical column, renamed and/or retyped
    AlterColumn { from: Column, to: Column },
    AddIndex(Index),
    DropIndex(Index),
    AlterIndex { from: Index, to: Index },
    AddForeignKey(ForeignKey),
    DropForeignKey(ForeignKey),
    AlterForeignKey { from: ForeignKey, to: ForeignKey },
}

/// Discriminant of an [`Operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateTable,
    DropTable,
    RenameTable,
    AddColumn,
    DropColumn,
    AlterColumn,
    AddIndex,
    DropIndex,
    AlterIndex,
    AddForeignKey,
    DropForeignKey,
    AlterForeignKey,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateTable(_) => OperationKind::CreateTable,
            Operation::DropTable(_) => OperationKind::DropTable,
            Operation::RenameTable { .. } => OperationKind::RenameTable,
            Operation::AddColumn(_) => OperationKind::AddColumn,
            Operation::DropColumn(_) => OperationKind::DropColumn,
            Operation::AlterColumn { .. } => OperationKind::AlterColumn,
            Operation::AddIndex(_) => OperationKind::AddIndex,
            Operation::DropIndex(_) => OperationKind::DropIndex,
            Operation::AlterIndex { .. } => OperationKind::AlterIndex,
            Operation::AddForeignKey(_) => OperationKind::AddForeignKey,
            Operation::DropForeignKey(_) => OperationKind::DropForeignKey,
            Operation::AlterForeignKey { .. } => OperationKind::AlterForeignKey,
        }
    }

    /// An `AlterColumn` that changes the column name
    pub fn is_rename(&self) -> bool {
        matches!(self, Operation::AlterColumn { from, to } if from.name != to.name)
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable(t) => format!("create table {}", t.name),
            Operation::DropTable(t) => format!("drop table {}", t.name),
            Operation::RenameTable { from, to } => format!("rename table {} to {}", from, to),
            Operation::AddColumn(c) => format!("add column {}", c.name),
            Operation::DropColumn(c) => format!("drop column {}", c.name),
            Operation::AlterColumn { from, to } if from.name != to.name => {
                format!("alter column {} (renamed to {})", from.name, to.name)
            }
            Operation::AlterColumn { to, .. } => format!("alter column {}", to.name),
            Operation::AddIndex(i) => format!("add index {}", i.name),
            Operation::DropIndex(i) => format!("drop index {}", i.name),
            Operation::AlterIndex { to, .. } => format!("alter index {}", to.name),
            Operation::AddForeignKey(fk) => format!("add foreign key {}", fk.name),
            Operation::DropForeignKey(fk) => format!("drop foreign key {}", fk.name),
            Operation::AlterForeignKey { to, .. } => format!("alter foreign key {}", to.name),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Synchronisation pass an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Removal of foreign keys no longer declared, before any structural drop
    DropForeignKeys,
    /// Tables, columns, indexes and the backup/restore of dependent constraints
    Structure,
    /// Foreign keys that are new or changed, once every table exists
    CreateForeignKeys,
}

/// Which phases a save applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveMode {
    pub drop_foreign_keys: bool,
    pub structure: bool,
    pub create_foreign_keys: bool,
}

impl SaveMode {
    pub const ALL: SaveMode = SaveMode {
        drop_foreign_keys: true,
        structure: true,
        create_foreign_keys: true,
    };
    pub const STRUCTURE_ONLY: SaveMode = SaveMode {
        drop_foreign_keys: false,
        structure: true,
        create_foreign_keys: false,
    };
    pub const DROP_FOREIGN_KEYS: SaveMode = SaveMode {
        drop_foreign_keys: true,
        structure: false,
        create_foreign_keys: false,
    };
    pub const CREATE_FOREIGN_KEYS: SaveMode = SaveMode {
        drop_foreign_keys: false,
        structure: false,
        create_foreign_keys: true,
    };

    pub fn includes(&self, phase: Phase) -> bool {
        match phase {
            Phase::DropForeignKeys => self.drop_foreign_keys,
            Phase::Structure => self.structure,
            Phase::CreateForeignKeys => self.create_foreign_keys,
        }
    }
}

impl Default for SaveMode {
    fn default() -> Self {
        SaveMode::ALL
    }
}

/// Caller-supplied hint that a declared column is an existing one renamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    pub from: String,
    pub to: String,
}

/// An operation tagged with its phase
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub phase: Phase,
    pub operation: Operation,
}

/// Ordered list of operations for one table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    pub table: String,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            changes: Vec::new(),
        }
    }

    fn push(&mut self, phase: Phase, operation: Operation) {
        self.changes.push(Change { phase, operation });
    }

    fn extend(&mut self, phase: Phase, operations: Vec<Operation>) {
        for operation in operations {
            self.push(phase, operation);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.changes.iter().map(|c| &c.operation)
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations().map(Operation::kind).collect()
    }

    /// Operations applied by a save in `mode`, in order.
    ///
    /// A `CreateTable` loses its foreign keys when foreign key creation is
    /// not selected; when only foreign key creation is selected they are
    /// emitted as `AddForeignKey` operations instead.
    pub fn select(&self, mode: SaveMode) -> Vec<Operation> {
        let mut operations = Vec::new();
        for change in &self.changes {
            match &change.operation {
                Operation::CreateTable(state) => {
                    if mode.structure {
                        let state = if mode.create_foreign_keys {
                            state.clone()
                        } else {
                            state.without_foreign_keys()
                        };
                        operations.push(Operation::CreateTable(state));
                    } else if mode.create_foreign_keys {
                        operations.extend(
                            state.foreign_keys.iter().cloned().map(Operation::AddForeignKey),
                        );
                    }
                }
                operation if mode.includes(change.phase) => operations.push(operation.clone()),
                _ => {}
            }
        }
        operations
    }
}

/// Fold both snapshots through the dialect so they compare like for like
fn normalize(state: &TableState, handler: &dyn Handler) -> TableState {
    let mut state = state.clone();
    for column in &mut state.columns {
        handler.normalize_declared(column);
    }
    for fk in &mut state.foreign_keys {
        handler.normalize_foreign_key(fk);
    }
    state
}

fn rename_all(names: &[String], renames: &HashMap<String, String>) -> Vec<String> {
    names
        .iter()
        .map(|n| renames.get(n).cloned().unwrap_or_else(|| n.clone()))
        .collect()
}

fn renamed_index(index: &Index, renames: &HashMap<String, String>, table: &str) -> Index {
    let mut index = index.clone();
    index.table = table.to_string();
    for column in &mut index.columns {
        if let Some(new) = renames.get(&column.name) {
            column.name = new.clone();
        }
    }
    index
}

fn renamed_foreign_key(fk: &ForeignKey, renames: &HashMap<String, String>, table: &str) -> ForeignKey {
    let mut fk = fk.clone();
    fk.table = table.to_string();
    fk.columns = rename_all(&fk.columns, renames);
    fk
}

/// Compute the change-set for one table.
///
/// `declared == None` means the table is to be dropped.
pub fn diff_table(
    current: &TableState,
    declared: Option<&TableState>,
    renames: &[ColumnRename],
    handler: &dyn Handler,
) -> Result<ChangeSet> {
    let Some(declared) = declared else {
        if !current.exists {
            return Err(Error::table_operation(
                &current.name,
                "cannot drop a table that does not exist",
            ));
        }
        let mut set = ChangeSet::new(&current.name);
        set.push(Phase::Structure, Operation::DropTable(current.clone()));
        return Ok(set);
    };

    let declared = normalize(declared, handler);
    let mut set = ChangeSet::new(&declared.name);
    if !current.exists {
        set.push(Phase::Structure, Operation::CreateTable(declared));
        return Ok(set);
    }

    let current = normalize(current, handler);
    let table = declared.name.as_str();
    let policy = handler.compare_policy();

    // old name -> new name, only for hints that resolve on both sides
    let column_renames: HashMap<String, String> = renames
        .iter()
        .filter(|r| {
            current.has_column(&r.from) && !current.has_column(&r.to) && declared.has_column(&r.to)
        })
        .map(|r| (r.from.clone(), r.to.clone()))
        .collect();
    let sources: HashMap<&str, &str> = column_renames
        .iter()
        .map(|(old, new)| (new.as_str(), old.as_str()))
        .collect();

    let current_pk = rename_all(&current.primary_keys, &column_renames);
    if current_pk != declared.primary_keys {
        return Err(Error::unsupported(
            table,
            "PRIMARY KEY",
            format!(
                "primary key of an existing table cannot change ({:?} -> {:?})",
                current_pk, declared.primary_keys
            ),
        ));
    }

    // Columns
    let mut matched: HashSet<&str> = HashSet::new();
    let mut adds = Vec::new();
    let mut alters = Vec::new();
    let mut index_backup: HashSet<&str> = HashSet::new();
    let mut fk_backup: HashSet<&str> = HashSet::new();

    for column in &declared.columns {
        let source = sources.get(column.name.as_str()).copied().unwrap_or(&column.name);
        let Some(existing) = current.column(source) else {
            adds.push(Operation::AddColumn(column.clone()));
            continue;
        };
        matched.insert(existing.name.as_str());

        let changes = column_differences(existing, column, policy);
        if changes.is_empty() {
            continue;
        }
        handler.check_alteration(table, existing, column)?;
        if handler.backs_up_indexes(&changes) {
            index_backup.insert(existing.name.as_str());
        }
        if handler.backs_up_foreign_keys(&changes) {
            fk_backup.insert(existing.name.as_str());
        }
        debug!(table, column = %column.name, ?changes, "column altered");
        alters.push(Operation::AlterColumn {
            from: existing.clone(),
            to: column.clone(),
        });
    }

    let drops: Vec<Operation> = current
        .columns
        .iter()
        .filter(|c| !matched.contains(c.name.as_str()))
        .map(|c| Operation::DropColumn(c.clone()))
        .collect();

    // Indexes, matched by ordered column names after renames
    let mut index_drops = Vec::new();
    let mut index_adds = Vec::new();
    let mut index_alters = Vec::new();
    let mut declared_matched: HashSet<usize> = HashSet::new();

    for index in &current.indexes {
        let renamed = renamed_index(index, &column_renames, table);
        let position = declared
            .indexes
            .iter()
            .enumerate()
            .position(|(i, d)| !declared_matched.contains(&i) && d.signature() == renamed.signature());
        let backed_up = index.columns.iter().any(|c| index_backup.contains(c.name.as_str()));

        match position {
            None => index_drops.push(Operation::DropIndex(index.clone())),
            Some(i) => {
                declared_matched.insert(i);
                let target = &declared.indexes[i];
                let equal = indexes_equal(&renamed, target);
                if backed_up {
                    index_drops.push(Operation::DropIndex(index.clone()));
                    if handler.restores_dependencies() || !equal {
                        index_adds.push(Operation::AddIndex(target.clone()));
                    } else {
                        warn!(table, index = %index.name, "index dropped for column alteration is not restored");
                    }
                } else if !equal {
                    index_alters.push(Operation::AlterIndex {
                        from: index.clone(),
                        to: target.clone(),
                    });
                }
            }
        }
    }
    for (i, index) in declared.indexes.iter().enumerate() {
        if !declared_matched.contains(&i) {
            index_adds.push(Operation::AddIndex(index.clone()));
        }
    }

    // Foreign keys, matched by local column set after renames
    let mut fk_removed = Vec::new();
    let mut fk_backup_drops = Vec::new();
    let mut fk_restores = Vec::new();
    let mut fk_creates = Vec::new();
    let mut declared_matched: HashSet<usize> = HashSet::new();

    for fk in &current.foreign_keys {
        let renamed = renamed_foreign_key(fk, &column_renames, table);
        let position = declared
            .foreign_keys
            .iter()
            .enumerate()
            .position(|(i, d)| !declared_matched.contains(&i) && d.signature() == renamed.signature());
        let backed_up = fk.columns.iter().any(|c| fk_backup.contains(c.as_str()));

        match position {
            None => fk_removed.push(Operation::DropForeignKey(fk.clone())),
            Some(i) => {
                declared_matched.insert(i);
                let target = &declared.foreign_keys[i];
                let equal = foreign_keys_equal(&renamed, target);
                if backed_up {
                    fk_backup_drops.push(Operation::DropForeignKey(renamed_table(fk, &current.name, table)));
                    if !equal {
                        fk_creates.push(Operation::AddForeignKey(target.clone()));
                    } else if handler.restores_dependencies() {
                        fk_restores.push(Operation::AddForeignKey(target.clone()));
                    } else {
                        warn!(table, foreign_key = %fk.name, "foreign key dropped for column alteration is not restored");
                    }
                } else if !equal {
                    fk_creates.push(Operation::AlterForeignKey {
                        from: renamed_table(fk, &current.name, table),
                        to: target.clone(),
                    });
                }
            }
        }
    }
    for (i, fk) in declared.foreign_keys.iter().enumerate() {
        if !declared_matched.contains(&i) {
            fk_creates.push(Operation::AddForeignKey(fk.clone()));
        }
    }

    // Current-side operations after a table rename address the new name
    let index_drops = index_drops
        .into_iter()
        .map(|op| match op {
            Operation::DropIndex(mut index) => {
                index.table = table.to_string();
                Operation::DropIndex(index)
            }
            other => other,
        })
        .collect();
    let index_alters = index_alters
        .into_iter()
        .map(|op| match op {
            Operation::AlterIndex { mut from, to } => {
                from.table = table.to_string();
                Operation::AlterIndex { from, to }
            }
            other => other,
        })
        .collect();

    set.extend(Phase::DropForeignKeys, fk_removed);
    if current.name != declared.name {
        set.push(
            Phase::Structure,
            Operation::RenameTable {
                from: current.name.clone(),
                to: declared.name.clone(),
            },
        );
    }
    set.extend(Phase::Structure, fk_backup_drops);
    set.extend(Phase::Structure, index_drops);
    set.extend(Phase::Structure, drops);
    set.extend(Phase::Structure, adds);
    set.extend(Phase::Structure, alters);
    set.extend(Phase::Structure, index_adds);
    set.extend(Phase::Structure, index_alters);
    set.extend(Phase::Structure, fk_restores);
    set.extend(Phase::CreateForeignKeys, fk_creates);

    Ok(set)
}

fn renamed_table(fk: &ForeignKey, from: &str, to: &str) -> ForeignKey {
    let mut fk = fk.clone();
    if fk.table == from {
        fk.table = to.to_string();
    }
    fk
}

/// The state a table reaches after `operations` are applied to `before`
pub fn apply_operations(before: &TableState, operations: &[Operation]) -> TableState {
    let mut state = before.clone();
    for operation in operations {
        match operation {
            Operation::CreateTable(table) => {
                state = table.clone();
                state.exists = true;
            }
            Operation::DropTable(table) => state = TableState::new(&table.name),
            Operation::RenameTable { to, .. } => {
                state.name = to.clone();
                for index in &mut state.indexes {
                    index.table = to.clone();
                }
                for fk in &mut state.foreign_keys {
                    fk.table = to.clone();
                }
            }
            Operation::AddColumn(column) => state.upsert_column(column.clone()),
            Operation::DropColumn(column) => {
                state.columns.retain(|c| c.name != column.name);
                state.primary_keys.retain(|c| c != &column.name);
            }
            Operation::AlterColumn { from, to } => {
                match state.columns.iter_mut().find(|c| c.name == from.name) {
                    Some(slot) => *slot = to.clone(),
                    None => state.columns.push(to.clone()),
                }
                if from.name != to.name {
                    rename_column_references(&mut state, &from.name, &to.name);
                }
            }
            Operation::AddIndex(index) => state.indexes.push(index.clone()),
            Operation::DropIndex(index) => state.indexes.retain(|i| i.name != index.name),
            Operation::AlterIndex { from, to } => {
                state.indexes.retain(|i| i.name != from.name);
                state.indexes.push(to.clone());
            }
            Operation::AddForeignKey(fk) => state.foreign_keys.push(fk.clone()),
            Operation::DropForeignKey(fk) => state.foreign_keys.retain(|f| f.name != fk.name),
            Operation::AlterForeignKey { from, to } => {
                state.foreign_keys.retain(|f| f.name != from.name);
                state.foreign_keys.push(to.clone());
            }
        }
    }
    state
}

/// Point index, foreign key and primary key entries at a renamed column
pub(crate) fn rename_column_references(state: &mut TableState, from: &str, to: &str) {
    for index in &mut state.indexes {
        for column in &mut index.columns {
            if column.name == from {
                column.name = to.to_string();
            }
        }
    }
    for fk in &mut state.foreign_keys {
        for column in &mut fk.columns {
            if column == from {
                *column = to.to_string();
            }
        }
    }
    for pk in &mut state.primary_keys {
        if pk == from {
            *pk = to.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::schema::types::{AbstractType, DefaultValue, ForeignKeyAction, IndexColumn};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use OperationKind::*;

    fn users() -> TableState {
        let mut table = TableState::new("users");
        table.exists = true;
        table.columns.push(Column::new("id", AbstractType::Primary));
        table.columns.push(Column::new("email", AbstractType::String));
        table.primary_keys.push("id".into());
        table
    }

    fn posts() -> TableState {
        let mut table = TableState::new("posts");
        table.exists = true;
        table.columns.push(Column::new("id", AbstractType::Primary));
        table.columns.push(Column::new("user_id", AbstractType::Integer));
        table.columns.push(Column::new("title", AbstractType::String));
        table.primary_keys.push("id".into());
        table
            .indexes
            .push(Index::new("posts", "posts_user_id_idx", vec![IndexColumn::asc("user_id")], false));
        table.foreign_keys.push(ForeignKey {
            table: "posts".into(),
            name: "posts_user_id_fk".into(),
            columns: vec!["user_id".into()],
            foreign_table: "users".into(),
            foreign_columns: vec!["id".into()],
            on_delete: ForeignKeyAction::Cascade,
            on_update: ForeignKeyAction::NoAction,
        });
        table
    }

    fn alter_type(table: &mut TableState, column: &str, ty: AbstractType) {
        if let Some(c) = table.columns.iter_mut().find(|c| c.name == column) {
            c.abstract_type = ty;
        }
    }

    #[rstest]
    #[case(DialectKind::MySql)]
    #[case(DialectKind::Postgres)]
    #[case(DialectKind::Sqlite)]
    #[case(DialectKind::SqlServer)]
    #[case(DialectKind::Oracle)]
    fn diff_against_itself_is_empty(#[case] dialect: DialectKind) {
        let mut table = posts();
        table.columns.push(
            Column::new("status", AbstractType::Enum)
                .enum_values(["draft", "published"])
                .default_value(DefaultValue::literal("draft")),
        );
        table.columns.push(Column::new("price", AbstractType::Decimal).precision(8, 2));
        table.columns.push(Column::new("big", AbstractType::BigPrimary));
        let set = diff_table(&table, Some(&table), &[], dialect.handler()).unwrap();
        assert!(set.is_empty(), "{:?}", set.kinds());
    }

    #[test]
    fn adding_a_column_is_minimal() {
        let mut current = TableState::new("t");
        current.exists = true;
        current.columns.push(Column::new("col_a", AbstractType::Integer));
        let mut declared = current.clone();
        declared.columns.push(Column::new("col_b", AbstractType::String));

        let set = diff_table(&current, Some(&declared), &[], DialectKind::Postgres.handler()).unwrap();
        assert_eq!(set.kinds(), vec![AddColumn]);
    }

    #[test]
    fn rename_hint_produces_alter_not_drop_add() {
        let mut current = TableState::new("t");
        current.exists = true;
        current.columns.push(Column::new("col_a", AbstractType::Integer));
        let mut declared = TableState::new("t");
        declared.columns.push(Column::new("col_b", AbstractType::Integer));

        let hint = [ColumnRename {
            from: "col_a".into(),
            to: "col_b".into(),
        }];
        let set = diff_table(&current, Some(&declared), &hint, DialectKind::Postgres.handler()).unwrap();
        assert_eq!(set.kinds(), vec![AlterColumn]);
        assert!(set.changes[0].operation.is_rename());

        let without_hint = diff_table(&current, Some(&declared), &[], DialectKind::Postgres.handler()).unwrap();
        assert_eq!(without_hint.kinds(), vec![DropColumn, AddColumn]);
    }

    #[rstest]
    #[case(DialectKind::MySql)]
    #[case(DialectKind::Postgres)]
    #[case(DialectKind::SqlServer)]
    fn type_change_backs_up_dependents(#[case] dialect: DialectKind) {
        let current = posts();
        let mut declared = posts();
        alter_type(&mut declared, "user_id", AbstractType::BigInteger);

        let set = diff_table(&current, Some(&declared), &[], dialect.handler()).unwrap();
        assert_eq!(
            set.kinds(),
            vec![DropForeignKey, DropIndex, AlterColumn, AddIndex, AddForeignKey]
        );
        assert!(set.changes.iter().all(|c| c.phase == Phase::Structure));
    }

    #[test]
    fn oracle_does_not_restore_dependents() {
        let current = posts();
        let mut declared = posts();
        alter_type(&mut declared, "user_id", AbstractType::BigInteger);

        let set = diff_table(&current, Some(&declared), &[], DialectKind::Oracle.handler()).unwrap();
        assert_eq!(set.kinds(), vec![DropForeignKey, DropIndex, AlterColumn]);
    }

    #[test]
    fn nullability_change_only_backs_up_on_sqlserver_and_mysql_fks() {
        let current = posts();
        let mut declared = posts();
        declared.columns[1].nullable = true;

        let pg = diff_table(&current, Some(&declared), &[], DialectKind::Postgres.handler()).unwrap();
        assert_eq!(pg.kinds(), vec![AlterColumn]);

        let mysql = diff_table(&current, Some(&declared), &[], DialectKind::MySql.handler()).unwrap();
        assert_eq!(mysql.kinds(), vec![DropForeignKey, AlterColumn, AddForeignKey]);

        let mssql = diff_table(&current, Some(&declared), &[], DialectKind::SqlServer.handler()).unwrap();
        assert_eq!(
            mssql.kinds(),
            vec![DropForeignKey, DropIndex, AlterColumn, AddIndex, AddForeignKey]
        );
    }

    #[test]
    fn removed_and_new_foreign_keys_use_their_own_phases() {
        let current = posts();
        let mut declared = posts();
        declared.foreign_keys[0].columns = vec!["title".into()];

        let set = diff_table(&current, Some(&declared), &[], DialectKind::Postgres.handler()).unwrap();
        let phases: Vec<(OperationKind, Phase)> =
            set.changes.iter().map(|c| (c.operation.kind(), c.phase)).collect();
        assert_eq!(
            phases,
            vec![
                (DropForeignKey, Phase::DropForeignKeys),
                (AddForeignKey, Phase::CreateForeignKeys),
            ]
        );
    }

    #[test]
    fn changed_index_is_altered() {
        let current = posts();
        let mut declared = posts();
        declared.indexes[0].unique = true;
        let set = diff_table(&current, Some(&declared), &[], DialectKind::Postgres.handler()).unwrap();
        assert_eq!(set.kinds(), vec![AlterIndex]);
    }

    #[test]
    fn new_table_short_circuits_to_create() {
        let current = TableState::new("posts");
        let set = diff_table(&current, Some(&posts()), &[], DialectKind::Postgres.handler()).unwrap();
        assert_eq!(set.kinds(), vec![CreateTable]);

        let structure = set.select(SaveMode::STRUCTURE_ONLY);
        assert!(matches!(&structure[0], Operation::CreateTable(t) if t.foreign_keys.is_empty()));
        let fks = set.select(SaveMode::CREATE_FOREIGN_KEYS);
        assert_eq!(fks.iter().map(Operation::kind).collect::<Vec<_>>(), vec![AddForeignKey]);
        assert!(set.select(SaveMode::DROP_FOREIGN_KEYS).is_empty());
    }

    #[test]
    fn dropping_a_missing_table_fails() {
        let current = TableState::new("ghost");
        let err = diff_table(&current, None, &[], DialectKind::Sqlite.handler()).unwrap_err();
        assert!(matches!(err, Error::TableOperationError { .. }));

        let set = diff_table(&users(), None, &[], DialectKind::Sqlite.handler()).unwrap();
        assert_eq!(set.kinds(), vec![DropTable]);
    }

    #[test]
    fn primary_key_changes_are_unsupported() {
        let current = users();
        let mut declared = users();
        declared.primary_keys = vec!["email".into()];
        let err = diff_table(&current, Some(&declared), &[], DialectKind::MySql.handler()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlterationError { .. }));
    }

    #[test]
    fn table_rename_comes_first_in_structure() {
        let current = posts();
        let mut declared = posts();
        declared.name = "articles".into();
        declared.indexes[0].table = "articles".into();
        declared.foreign_keys[0].table = "articles".into();
        declared.columns.push(Column::new("body", AbstractType::Text).nullable(true));

        let set = diff_table(&current, Some(&declared), &[], DialectKind::Postgres.handler()).unwrap();
        assert_eq!(set.kinds(), vec![RenameTable, AddColumn]);
        assert_eq!(set.table, "articles");
    }

    #[test]
    fn applying_operations_tracks_renames() {
        let current = posts();
        let mut renamed = current.columns[1].clone();
        renamed.name = "author_id".into();
        let after = apply_operations(
            &current,
            &[Operation::AlterColumn {
                from: current.columns[1].clone(),
                to: renamed,
            }],
        );
        assert!(after.has_column("author_id"));
        assert_eq!(after.indexes[0].column_names(), vec!["author_id"]);
        assert_eq!(after.foreign_keys[0].columns, vec!["author_id".to_string()]);
    }
}
