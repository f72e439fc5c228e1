//! Planning, ordering and failure handling against a scripted driver

mod common;

use pretty_assertions::assert_eq;

use common::{position, MockDriver};
use dbal::schema::{IndexColumn, SaveMode};
use dbal::{
    AbstractType, Column, DatabaseOptions, DefaultValue, DialectKind, Error, ForeignKey,
    ForeignKeyAction, Index, Row, Synchronizer, TableSchema, TableState, Value,
};

fn sql(report: &dbal::SyncReport) -> Vec<String> {
    report.statements.iter().map(|s| s.sql.clone()).collect()
}

#[tokio::test]
async fn plan_creates_tables_before_their_foreign_keys() {
    let driver = MockDriver::new(DialectKind::Postgres);
    let db = driver.database(DatabaseOptions::default());

    let mut posts = db.table("posts").await.unwrap();
    posts
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("author_id", AbstractType::Integer))
        .foreign_key(&["author_id"], "authors", &["id"], ForeignKeyAction::Cascade, ForeignKeyAction::NoAction);
    let mut authors = db.table("authors").await.unwrap();
    authors.column(Column::new("id", AbstractType::Primary));

    let mut sync = Synchronizer::new();
    sync.add(posts).add(authors);
    let report = sync.plan().unwrap();
    let sql = sql(&report);

    let create_authors = position(&sql, "CREATE TABLE \"authors\"");
    let create_posts = position(&sql, "CREATE TABLE \"posts\"");
    let add_fk = position(&sql, "ADD CONSTRAINT \"posts_author_id_fk\" FOREIGN KEY");
    assert!(create_authors < create_posts && create_posts < add_fk);
    assert!(!sql[create_posts].contains("REFERENCES"));
    assert_eq!(report.applied, vec!["authors", "posts"]);
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn cyclic_references_close_in_the_last_pass() {
    let driver = MockDriver::new(DialectKind::Postgres);
    let db = driver.database(DatabaseOptions::default());

    let mut left = db.table("left_side").await.unwrap();
    left.column(Column::new("id", AbstractType::Primary))
        .column(Column::new("right_id", AbstractType::Integer).nullable(true))
        .foreign_key(&["right_id"], "right_side", &["id"], ForeignKeyAction::SetNull, ForeignKeyAction::NoAction);
    let mut right = db.table("right_side").await.unwrap();
    right
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("left_id", AbstractType::Integer).nullable(true))
        .foreign_key(&["left_id"], "left_side", &["id"], ForeignKeyAction::SetNull, ForeignKeyAction::NoAction);

    let mut sync = Synchronizer::new();
    sync.add(left).add(right);
    let report = sync.plan().unwrap();
    let sql = sql(&report);

    let last_create = position(&sql, "CREATE TABLE \"left_side\"").max(position(&sql, "CREATE TABLE \"right_side\""));
    let first_fk = position(&sql, "FOREIGN KEY");
    assert!(last_create < first_fk);
    assert_eq!(sql.iter().filter(|s| s.contains("FOREIGN KEY")).count(), 2);
    assert!(report.skipped.is_empty());
}

#[tokio::test]
async fn readonly_handle_refuses_to_save() {
    let driver = MockDriver::new(DialectKind::Postgres);
    let db = driver.database(DatabaseOptions {
        readonly: true,
        transaction_per_table: true,
        ..Default::default()
    });

    let mut declared = TableState::new("users");
    declared.columns.push(Column::new("id", AbstractType::Primary));
    declared.primary_keys.push("id".into());
    let mut users = TableSchema::from_states(db, TableState::new("users"), Some(declared));

    let err = users.save(SaveMode::ALL).await.unwrap_err();
    match err {
        Error::ReadonlyConnectionError { sql } => assert!(sql.starts_with("CREATE TABLE \"users\"")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(driver.executed().is_empty());
    assert_eq!(users.database().transaction_depth(), 0);
    assert!(!users.exists());
}

#[tokio::test]
async fn invalid_column_is_rejected_before_any_sql() {
    let driver = MockDriver::new(DialectKind::MySql);
    let db = driver.database(DatabaseOptions::default());

    let mut notes = db.table("notes").await.unwrap();
    notes
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("body", AbstractType::Text).default_value(DefaultValue::literal("hello")));

    let err = notes.save(SaveMode::ALL).await.unwrap_err();
    assert!(matches!(err, Error::InvalidColumnConfigurationError { ref column, .. } if column == "body"));
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn sqlserver_nested_commit_has_no_release() {
    let driver = MockDriver::new(DialectKind::SqlServer);
    let db = driver.database(DatabaseOptions::default());

    db.begin_transaction().await.unwrap();
    db.begin_transaction().await.unwrap();
    db.commit().await.unwrap();
    db.commit().await.unwrap();

    assert_eq!(
        driver.executed(),
        vec!["BEGIN TRANSACTION", "SAVE TRANSACTION [SVP1]", "COMMIT TRANSACTION"]
    );
    assert_eq!(db.transaction_depth(), 0);
}

#[tokio::test]
async fn sqlserver_type_change_backs_up_dependencies() {
    let driver = MockDriver::new(DialectKind::SqlServer);
    let db = driver.database(DatabaseOptions::default());

    let mut current = TableState::new("orders");
    current.exists = true;
    current.columns.push(Column::new("id", AbstractType::Primary));
    current.columns.push(Column::new("customer_id", AbstractType::Integer));
    current.primary_keys.push("id".into());
    current.indexes.push(Index::new(
        "orders",
        "orders_customer_idx",
        vec![IndexColumn::asc("customer_id")],
        false,
    ));
    current.foreign_keys.push(ForeignKey {
        table: "orders".into(),
        name: "orders_customer_id_fk".into(),
        columns: vec!["customer_id".into()],
        foreign_table: "customers".into(),
        foreign_columns: vec!["id".into()],
        on_delete: ForeignKeyAction::Cascade,
        on_update: ForeignKeyAction::NoAction,
    });

    let mut declared = current.clone();
    declared.upsert_column(Column::new("customer_id", AbstractType::BigInteger));
    let mut orders = TableSchema::from_states(db, current, Some(declared));
    orders.save(SaveMode::ALL).await.unwrap();

    let sql = driver.executed();
    let drop_fk = position(&sql, "DROP CONSTRAINT [orders_customer_id_fk]");
    let drop_index = position(&sql, "DROP INDEX [orders_customer_idx]");
    let alter = position(&sql, "ALTER COLUMN [customer_id] bigint");
    let add_index = position(&sql, "CREATE INDEX [orders_customer_idx]");
    let add_fk = position(&sql, "ADD CONSTRAINT [orders_customer_id_fk] FOREIGN KEY");
    assert!(drop_fk < alter && drop_index < alter);
    assert!(alter < add_index && alter < add_fk);
    assert!(orders.change_set().unwrap().is_empty());
}

#[tokio::test]
async fn lost_connection_outside_a_transaction_is_retried() {
    let driver = MockDriver::new(DialectKind::MySql);
    let db = driver.database(DatabaseOptions::default());
    driver.fail_once(
        "CREATE TABLE",
        Error::DatabaseError("MySQL server has gone away".into()),
    );

    let mut users = db.table("users").await.unwrap();
    users.column(Column::new("id", AbstractType::Primary));
    users.save(SaveMode::ALL).await.unwrap();

    assert_eq!(driver.reconnects(), 1);
    let sql = driver.executed();
    assert_eq!(sql.iter().filter(|s| s.contains("CREATE TABLE `users`")).count(), 1);
}

#[tokio::test]
async fn failing_statement_rolls_back_the_table_transaction() {
    let driver = MockDriver::new(DialectKind::MySql);
    let db = driver.database(DatabaseOptions {
        transaction_per_table: true,
        ..Default::default()
    });
    driver.fail_once("CREATE TABLE", Error::DatabaseError("syntax error".into()));

    let mut users = db.table("users").await.unwrap();
    users.column(Column::new("id", AbstractType::Primary));
    let err = users.save(SaveMode::ALL).await.unwrap_err();

    match err {
        Error::DdlExecutionError { table, statement, .. } => {
            assert_eq!(table, "users");
            assert!(statement.sql.starts_with("CREATE TABLE `users`"));
        }
        other => panic!("unexpected error: {}", other),
    }
    let sql = driver.executed();
    assert_eq!(sql.len(), 2);
    assert_eq!(Some(sql[1].clone()), db.handler().rollback_sql());
    assert_eq!(driver.reconnects(), 0);
    assert_eq!(db.transaction_depth(), 0);
    assert!(!users.exists());
}

fn column_row(name: &str, column_type: &str, nullable: bool, default: Option<&str>, extra: &str) -> Row {
    Row::from_pairs([
        ("column_name", Value::from(name)),
        ("column_type", Value::from(column_type)),
        ("is_nullable", Value::from(if nullable { "YES" } else { "NO" })),
        ("column_default", default.map(Value::from).unwrap_or(Value::Null)),
        ("size", Value::Null),
        ("numeric_precision", Value::Null),
        ("numeric_scale", Value::Null),
        ("extra", Value::from(extra)),
    ])
}

#[tokio::test]
async fn introspected_mysql_table_matches_its_declaration() {
    let driver = MockDriver::new(DialectKind::MySql);
    driver
        .respond(
            "information_schema.tables",
            vec![Row::from_pairs([("table_name", "users")])],
        )
        .respond(
            "information_schema.columns",
            vec![
                column_row("id", "int", false, None, "auto_increment"),
                column_row("email", "varchar(190)", true, None, ""),
                column_row("status", "enum('draft','published')", false, Some("draft"), ""),
                column_row("active", "tinyint(1)", false, Some("1"), ""),
            ],
        )
        .respond(
            "constraint_name = 'PRIMARY'",
            vec![Row::from_pairs([("column_name", "id")])],
        );
    let db = driver.database(DatabaseOptions::default());

    assert_eq!(db.tables().await.unwrap(), vec!["users"]);
    let mut users = db.table("users").await.unwrap();
    assert!(users.exists());
    assert_eq!(users.current().column("id").unwrap().abstract_type, AbstractType::Primary);
    assert_eq!(users.current().column("active").unwrap().abstract_type, AbstractType::Boolean);

    users
        .column(Column::new("id", AbstractType::Primary))
        .column(Column::new("email", AbstractType::String).size(190).nullable(true))
        .column(
            Column::new("status", AbstractType::Enum)
                .enum_values(["draft", "published"])
                .default_value(DefaultValue::literal("draft")),
        )
        .column(Column::new("active", AbstractType::Boolean).default_value(DefaultValue::literal(true)));
    assert!(users.change_set().unwrap().is_empty());

    // Enum order is significant on MySQL
    users.column(
        Column::new("status", AbstractType::Enum)
            .enum_values(["published", "draft"])
            .default_value(DefaultValue::literal("draft")),
    );
    let statements = users.render(SaveMode::ALL).unwrap();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].sql.contains("CHANGE `status` `status` enum('published', 'draft')"));
}

#[tokio::test]
async fn dropping_a_missing_table_runs_nothing() {
    let driver = MockDriver::new(DialectKind::Postgres);
    let db = driver.database(DatabaseOptions::default());

    let mut ghosts = db.table("ghosts").await.unwrap();
    ghosts.declare_dropped();
    let err = ghosts.save(SaveMode::ALL).await.unwrap_err();

    assert!(matches!(err, Error::TableOperationError { .. }));
    assert!(err.is_table_scoped());
    assert!(driver.executed().is_empty());
}

#[tokio::test]
async fn postgres_unique_constraints_are_not_dropped_as_indexes() {
    let driver = MockDriver::new(DialectKind::Postgres);
    driver
        .respond(
            "c.relkind IN ('r', 'p')",
            vec![Row::from_pairs([("table_name", "users")])],
        )
        .respond(
            "information_schema.columns",
            vec![
                Row::from_pairs([
                    ("column_name", Value::from("id")),
                    ("data_type", Value::from("integer")),
                    ("is_nullable", Value::from("NO")),
                    ("column_default", Value::Null),
                    ("size", Value::Null),
                    ("numeric_precision", Value::Int(32)),
                    ("numeric_scale", Value::Int(0)),
                    ("is_identity", Value::from("YES")),
                ]),
                Row::from_pairs([
                    ("column_name", Value::from("email")),
                    ("data_type", Value::from("character varying")),
                    ("is_nullable", Value::from("NO")),
                    ("column_default", Value::Null),
                    ("size", Value::Int(190)),
                    ("numeric_precision", Value::Null),
                    ("numeric_scale", Value::Null),
                    ("is_identity", Value::from("NO")),
                ]),
            ],
        )
        .respond("WHERE i.indisprimary", vec![Row::from_pairs([("column_name", "id")])])
        // `users_email_key` backs `UNIQUE (email)`; the catalog only hides it
        // from queries that exclude constraint-owned indexes
        .respond(
            "pg_catalog.pg_index ix",
            vec![Row::from_pairs([
                ("index_name", Value::from("users_email_key")),
                ("column_name", Value::from("email")),
                ("is_unique", Value::Bool(true)),
                ("is_descending", Value::Bool(false)),
            ])],
        )
        .respond("con.conindid = ix.indexrelid", Vec::new());
    let db = driver.database(DatabaseOptions::default());

    let live = db.table("users").await.unwrap();
    assert!(live.exists());
    assert!(live.current().indexes.is_empty());

    let mut declared = TableState::new("users");
    declared.columns.push(Column::new("id", AbstractType::Primary));
    declared.columns.push(Column::new("email", AbstractType::String).size(190));
    declared.primary_keys.push("id".into());
    let users = TableSchema::from_states(db, live.current().clone(), Some(declared));

    let statements = users.render(SaveMode::ALL).unwrap();
    assert!(
        statements.iter().all(|s| !s.sql.contains("DROP INDEX")),
        "{:#?}",
        statements
    );
}

fn sqlite_authors() -> (TableState, TableState) {
    let mut current = TableState::new("authors");
    current.exists = true;
    current.columns.push(Column::new("id", AbstractType::Primary));
    current
        .columns
        .push(Column::new("name", AbstractType::String).default_value(DefaultValue::literal("")));
    current.primary_keys.push("id".into());

    let mut declared = current.clone();
    declared.columns.retain(|c| c.name != "name");
    (current, declared)
}

#[tokio::test]
async fn sqlite_rebuild_switches_foreign_keys_outside_the_transaction() {
    let driver = MockDriver::new(DialectKind::Sqlite);
    let db = driver.database(DatabaseOptions {
        transaction_per_table: true,
        ..Default::default()
    });
    let handler = db.handler();
    let (current, declared) = sqlite_authors();
    let mut authors = TableSchema::from_states(db.clone(), current, Some(declared));
    authors.save(SaveMode::ALL).await.unwrap();

    let sql = driver.executed();
    let begin = handler.begin_transaction_sql().unwrap();
    let commit = handler.commit_sql().unwrap();
    assert_eq!(sql.first().map(String::as_str), Some("PRAGMA foreign_keys = OFF"));
    assert_eq!(sql[1], begin);
    assert!(position(&sql, "DROP TABLE \"authors\"") < position(&sql, &commit));
    assert_eq!(sql[sql.len() - 2], commit);
    assert_eq!(sql.last().map(String::as_str), Some("PRAGMA foreign_keys = ON"));
}

#[tokio::test]
async fn failed_sqlite_rebuild_still_restores_foreign_keys() {
    let driver = MockDriver::new(DialectKind::Sqlite);
    let db = driver.database(DatabaseOptions {
        transaction_per_table: true,
        ..Default::default()
    });
    driver.fail_once("DROP TABLE", Error::DatabaseError("database is locked".into()));
    let (current, declared) = sqlite_authors();
    let mut authors = TableSchema::from_states(db.clone(), current, Some(declared));

    let err = authors.save(SaveMode::ALL).await.unwrap_err();
    assert!(matches!(err, Error::DdlExecutionError { .. }));

    let sql = driver.executed();
    let rollback = db.handler().rollback_sql().unwrap();
    assert_eq!(sql[sql.len() - 2], rollback);
    assert_eq!(sql.last().map(String::as_str), Some("PRAGMA foreign_keys = ON"));
    assert_eq!(db.transaction_depth(), 0);
    assert!(authors.current().has_column("name"));
}
