//! Synchronisation against a live in-memory SQLite database

mod common;

use pretty_assertions::assert_eq;
use rstest::rstest;

use common::{position, sqlite_memory, sqlite_memory_with};
use dbal::{
    AbstractType, Column, DefaultValue, Error, ForeignKeyAction, SaveMode, Synchronizer,
};

async fn create_users(db: &dbal::Database) {
    let mut users = db.create_table("users").await.unwrap();
    users
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("name", AbstractType::String).default_value(DefaultValue::literal("")))
        .column(Column::new("email", AbstractType::String).size(190).nullable(true))
        .column(Column::new("score", AbstractType::Integer).default_value(DefaultValue::literal(0)));
    users.index(&["email"], true);
    users.save(SaveMode::ALL).await.unwrap();
}

#[tokio::test]
async fn saved_table_reads_back_without_changes() {
    let db = sqlite_memory().await;
    create_users(&db).await;

    let users = db.table("users").await.unwrap();
    assert!(users.exists());
    assert_eq!(users.current().primary_keys, vec!["id"]);
    assert_eq!(users.current().indexes.len(), 1);
    assert!(users.change_set().unwrap().is_empty());
    assert_eq!(db.tables().await.unwrap(), vec!["users"]);
}

#[tokio::test]
async fn every_abstract_type_survives_a_round_trip() {
    let db = sqlite_memory().await;
    let declared = [
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

    let mut table = db.create_table("samples").await.unwrap();
    table.column(Column::new("id", AbstractType::Primary));
    for ty in declared {
        let mut column = Column::new(&format!("c_{}", ty), ty).nullable(true);
        if ty == AbstractType::Enum {
            column = column.enum_values(["draft", "published"]);
        }
        if ty == AbstractType::Decimal {
            column = column.precision(10, 2);
        }
        table.column(column);
    }
    table.save(SaveMode::ALL).await.unwrap();

    let table = db.table("samples").await.unwrap();
    let current = table.current();
    assert_eq!(current.column("id").unwrap().abstract_type, AbstractType::Primary);
    for ty in declared {
        let column = current.column(&format!("c_{}", ty)).unwrap();
        assert_eq!(column.abstract_type, ty, "column {}", column.name);
    }
    assert_eq!(
        current.column("c_enum").unwrap().enum_values,
        vec!["draft", "published"]
    );
    assert_eq!(current.column("c_decimal").unwrap().scale, Some(2));
}

#[tokio::test]
async fn big_primary_folds_into_the_rowid_alias() {
    let db = sqlite_memory().await;
    let mut table = db.create_table("events").await.unwrap();
    table.column(Column::new("id", AbstractType::BigPrimary));
    table.save(SaveMode::ALL).await.unwrap();

    let mut table = db.table("events").await.unwrap();
    assert_eq!(table.current().column("id").unwrap().abstract_type, AbstractType::Primary);

    table.column(Column::new("id", AbstractType::BigPrimary));
    assert!(table.change_set().unwrap().is_empty());
}

/// SQLite does not enforce VARCHAR lengths, so every string column is
/// stored as varchar(255). Shrinking one still rebuilds the table, and the
/// column reads back at 255.
#[tokio::test]
async fn shrinking_a_string_rebuilds_and_reads_back_255() {
    let db = sqlite_memory().await;
    create_users(&db).await;
    db.execute("INSERT INTO users (name, email) VALUES ('ada', 'ada@example.com')", &[])
        .await
        .unwrap();

    let mut users = db.table("users").await.unwrap();
    assert_eq!(users.current().column("name").unwrap().size, Some(255));
    users.column(Column::new("name", AbstractType::String).size(100).default_value(DefaultValue::literal("")));

    let statements = users.save(SaveMode::ALL).await.unwrap();
    let sql: Vec<String> = statements.iter().map(|s| s.sql.clone()).collect();
    let create = position(&sql, "CREATE TABLE \"users__shadow\"");
    let copy = position(&sql, "INSERT INTO \"users__shadow\"");
    let drop = position(&sql, "DROP TABLE \"users\"");
    let rename = position(&sql, "RENAME TO \"users\"");
    assert!(create < copy && copy < drop && drop < rename);

    users.refresh().await.unwrap();
    assert_eq!(users.current().column("name").unwrap().size, Some(255));
    assert_eq!(users.current().indexes.len(), 1);

    let rows = db.query("SELECT name, email FROM users", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text("name").as_deref(), Some("ada"));
}

#[tokio::test]
async fn renamed_column_keeps_its_rows() {
    let db = sqlite_memory().await;
    create_users(&db).await;
    db.execute("INSERT INTO users (name) VALUES ('grace')", &[])
        .await
        .unwrap();

    let mut users = db.table("users").await.unwrap();
    users.rename_column("name", "full_name").unwrap();
    users.save(SaveMode::ALL).await.unwrap();

    let rows = db.query("SELECT full_name FROM users", &[]).await.unwrap();
    assert_eq!(rows[0].text("full_name").as_deref(), Some("grace"));
    users.refresh().await.unwrap();
    assert!(users.current().has_column("full_name"));
    assert!(!users.current().has_column("name"));
}

#[tokio::test]
async fn dropping_a_missing_table_fails_before_any_sql() {
    let db = sqlite_memory().await;
    let mut ghost = db.table("ghosts").await.unwrap();
    ghost.declare_dropped();

    let err = ghost.save(SaveMode::ALL).await.unwrap_err();
    assert!(matches!(err, Error::TableOperationError { .. }));
    assert!(db.tables().await.unwrap().is_empty());
}

#[tokio::test]
async fn creating_an_existing_table_is_refused() {
    let db = sqlite_memory().await;
    create_users(&db).await;
    let err = db.create_table("users").await.unwrap_err();
    assert!(matches!(err, Error::TableOperationError { .. }));
}

#[tokio::test]
async fn synchronizer_adds_foreign_keys_after_both_tables_exist() {
    let db = sqlite_memory().await;

    let mut posts = db.table("posts").await.unwrap();
    posts
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("author_id", AbstractType::Integer))
        .foreign_key(&["author_id"], "authors", &["id"], ForeignKeyAction::Cascade, ForeignKeyAction::NoAction);
    let mut authors = db.table("authors").await.unwrap();
    authors.column(Column::new("id", AbstractType::Primary));

    let mut sync = Synchronizer::new();
    sync.add(posts).add(authors);
    let report = sync.run().await.unwrap();
    assert!(report.skipped.is_empty());
    assert_eq!(report.applied, vec!["authors", "posts"]);

    let posts = db.table("posts").await.unwrap();
    let fks = &posts.current().foreign_keys;
    assert_eq!(fks.len(), 1);
    assert_eq!(fks[0].foreign_table, "authors");
    assert_eq!(fks[0].name, "posts_author_id_fk");
    assert_eq!(fks[0].on_delete, ForeignKeyAction::Cascade);
    assert!(posts.change_set().unwrap().is_empty());
}

#[tokio::test]
async fn truncate_empties_the_table() {
    let db = sqlite_memory().await;
    create_users(&db).await;
    db.execute("INSERT INTO users (name) VALUES ('linus')", &[])
        .await
        .unwrap();

    db.table("users").await.unwrap().truncate().await.unwrap();
    assert!(db.query("SELECT id FROM users", &[]).await.unwrap().is_empty());
}

/// Rebuilding a referenced table drops it; the drop must not cascade into
/// the children, with or without a per-table transaction around it.
#[rstest]
#[case(false)]
#[case(true)]
#[tokio::test]
async fn rebuilding_a_parent_keeps_child_rows(#[case] transaction_per_table: bool) {
    let db = sqlite_memory_with(transaction_per_table).await;

    let mut authors = db.create_table("authors").await.unwrap();
    authors
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("name", AbstractType::String).default_value(DefaultValue::literal("")));
    authors.save(SaveMode::ALL).await.unwrap();
    let mut posts = db.create_table("posts").await.unwrap();
    posts
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("author_id", AbstractType::Integer))
        .foreign_key(&["author_id"], "authors", &["id"], ForeignKeyAction::Cascade, ForeignKeyAction::NoAction);
    posts.save(SaveMode::ALL).await.unwrap();

    db.execute("INSERT INTO authors (name) VALUES ('ada')", &[])
        .await
        .unwrap();
    db.execute("INSERT INTO posts (author_id) VALUES (1)", &[])
        .await
        .unwrap();

    let mut authors = db.table("authors").await.unwrap();
    authors.drop_column("name").unwrap();
    let statements = authors.save(SaveMode::ALL).await.unwrap();
    let sql: Vec<String> = statements.iter().map(|s| s.sql.clone()).collect();
    assert!(position(&sql, "PRAGMA foreign_keys = OFF") < position(&sql, "DROP TABLE \"authors\""));
    assert_eq!(db.transaction_depth(), 0);

    let rows = db.query("SELECT author_id FROM posts", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].int("author_id"), Some(1));
    assert!(db.query("PRAGMA foreign_key_check", &[]).await.unwrap().is_empty());

    // Enforcement is back on once the rebuild is over
    let pragma = db.query("PRAGMA foreign_keys", &[]).await.unwrap();
    assert_eq!(pragma[0].int("foreign_keys"), Some(1));
    assert!(db
        .execute("INSERT INTO posts (author_id) VALUES (99)", &[])
        .await
        .is_err());

    let posts = db.table("posts").await.unwrap();
    assert_eq!(posts.current().foreign_keys[0].foreign_table, "authors");
    assert!(!db.table("authors").await.unwrap().current().has_column("name"));
}
