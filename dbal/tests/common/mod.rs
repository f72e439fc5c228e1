//! Shared test fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dbal::config::Config;
use dbal::{Database, DatabaseOptions, DialectKind, Driver, Error, Result, Row, Statement, Value};

/// Driver that answers catalog queries from a script and records writes
#[derive(Clone)]
pub struct MockDriver {
    dialect: DialectKind,
    responses: Arc<Mutex<Vec<(String, Vec<Row>)>>>,
    failures: Arc<Mutex<Vec<(String, Error)>>>,
    executed: Arc<Mutex<Vec<Statement>>>,
    reconnects: Arc<AtomicUsize>,
}

impl MockDriver {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            responses: Arc::default(),
            failures: Arc::default(),
            executed: Arc::default(),
            reconnects: Arc::default(),
        }
    }

    /// Answer queries containing `fragment` with `rows`; later scripts win
    pub fn respond(&self, fragment: &str, rows: Vec<Row>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push((fragment.to_string(), rows));
        self
    }

    /// Fail the next write containing `fragment`
    pub fn fail_once(&self, fragment: &str, error: Error) -> &Self {
        self.failures
            .lock()
            .unwrap()
            .push((fragment.to_string(), error));
        self
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn database(&self, options: DatabaseOptions) -> Database {
        Database::with_driver(self.clone(), options)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> DialectKind {
        self.dialect
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(position) = failures.iter().position(|(f, _)| sql.contains(f.as_str())) {
                return Err(failures.remove(position).1);
            }
        }
        self.executed
            .lock()
            .unwrap()
            .push(Statement::with_params(sql, params.to_vec()));
        Ok(1)
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fresh in-memory SQLite database through the bundled sqlx driver
pub async fn sqlite_memory() -> Database {
    sqlite_memory_with(false).await
}

/// In-memory SQLite, optionally applying each table in its own transaction
pub async fn sqlite_memory_with(transaction_per_table: bool) -> Database {
    let config: Config = toml::from_str(&format!(
        r#"
        [database]
        driver = "sqlite"
        url = "sqlite::memory:"

        [sync]
        transaction_per_table = {}
        "#,
        transaction_per_table
    ))
    .expect("valid test config");
    Database::connect(&config).await.expect("in-memory sqlite")
}

/// Position of the first statement containing `fragment`
pub fn position(sql: &[String], fragment: &str) -> usize {
    sql.iter()
        .position(|s| s.contains(fragment))
        .unwrap_or_else(|| panic!("no statement contains `{}` in {:#?}", fragment, sql))
}
