//! SQL executor
//!
//! [`Database`] is the handle the schema engine talks to. It owns one
//! [`Driver`], selects the dialect handler once, and layers the connection
//! policies on top: the read-only guard, transaction nesting through
//! savepoints, bounded reconnects and SQL logging.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, DatabaseConfig, SyncConfig};
use crate::db::connection::SqlxDriver;
use crate::db::driver::{Driver, Row, Statement, Value};
use crate::dialect::{DialectKind, Handler};
use crate::error::{Error, Result};
use crate::schema::analyzer::SchemaAnalyzer;
use crate::schema::builder::TableSchema;
use crate::utils::naming;

/// Connection policies of a [`Database`]
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseOptions {
    /// Prepended to every table name passed to the schema API
    pub prefix: String,
    pub readonly: bool,
    /// Reconnects tried for one statement before its error is returned
    pub reconnect_attempts: u32,
    pub search_path: Vec<String>,
    pub username: Option<String>,
    /// Log write statements instead of executing them
    pub dry_run: bool,
    pub transaction_per_table: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            readonly: false,
            reconnect_attempts: 3,
            search_path: Vec::new(),
            username: None,
            dry_run: false,
            transaction_per_table: false,
        }
    }
}

impl DatabaseOptions {
    pub fn from_config(database: &DatabaseConfig, sync: &SyncConfig) -> Self {
        Self {
            prefix: database.prefix.clone(),
            readonly: database.readonly,
            reconnect_attempts: database.reconnect_attempts.unwrap_or(3),
            search_path: database.search_path(),
            username: database.username.clone(),
            dry_run: sync.dry_run,
            transaction_per_table: sync.transaction_per_table,
        }
    }
}

struct Inner {
    driver: Box<dyn Driver>,
    handler: &'static dyn Handler,
    options: DatabaseOptions,
    depth: AtomicUsize,
}

/// Handle to one logical database over one physical connection
///
/// Cloning is cheap; clones share the connection and the transaction depth.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect())
            .field("options", &self.inner.options)
            .field("depth", &self.transaction_depth())
            .finish()
    }
}

fn savepoint_name(level: usize) -> String {
    format!("SVP{}", level)
}

impl Database {
    /// Connect through the bundled sqlx drivers
    pub async fn connect(config: &Config) -> Result<Self> {
        let driver = SqlxDriver::connect(&config.database).await?;
        Ok(Self::with_driver(
            driver,
            DatabaseOptions::from_config(&config.database, &config.sync),
        ))
    }

    /// Wrap a caller-supplied driver
    pub fn with_driver(driver: impl Driver + 'static, options: DatabaseOptions) -> Self {
        let handler = driver.dialect().handler();
        Self {
            inner: Arc::new(Inner {
                driver: Box::new(driver),
                handler,
                options,
                depth: AtomicUsize::new(0),
            }),
        }
    }

    pub fn dialect(&self) -> DialectKind {
        self.inner.handler.kind()
    }

    pub fn handler(&self) -> &'static dyn Handler {
        self.inner.handler
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn prefix(&self) -> &str {
        &self.inner.options.prefix
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.options.readonly
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        self.inner.handler.quote_identifier(name)
    }

    /// Search path with `$user` replaced by the configured username.
    /// Without a username the token is skipped.
    pub fn search_path(&self) -> Vec<String> {
        self.inner
            .options
            .search_path
            .iter()
            .filter_map(|schema| {
                if schema == "$user" {
                    self.inner.options.username.clone()
                } else {
                    Some(schema.clone())
                }
            })
            .collect()
    }

    /// Table name with the prefix applied to its unqualified part
    pub fn full_name(&self, name: &str) -> String {
        let prefix = self.prefix();
        let table = naming::unqualified(name);
        if prefix.is_empty() || table.starts_with(prefix) {
            return name.to_string();
        }
        match naming::split_qualified(name).0 {
            Some(schema) => format!("{}.{}{}", schema, prefix, table),
            None => format!("{}{}", prefix, table),
        }
    }

    pub fn transaction_depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Run `call`, reconnecting and retrying while the connection is lost.
    /// Never retries inside a transaction: its state died with the connection.
    async fn with_reconnect<T, F, Fut>(&self, sql: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if self.transaction_depth() == 0
                        && attempt < self.inner.options.reconnect_attempts
                        && self.inner.handler.is_connection_lost(&err) =>
                {
                    attempt += 1;
                    warn!(attempt, error = %err, sql, "connection lost, reconnecting");
                    self.inner.driver.reconnect().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run a row-returning statement. Reads are allowed on read-only handles.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql, ?params, "query");
        self.with_reconnect(sql, || self.inner.driver.query(sql, params))
            .await
    }

    /// Run a write statement
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if self.is_readonly() {
            return Err(Error::ReadonlyConnectionError { sql: sql.to_string() });
        }
        if self.inner.options.dry_run {
            info!(sql, ?params, "dry run, statement not executed");
            return Ok(0);
        }
        debug!(sql, ?params, "execute");
        self.with_reconnect(sql, || self.inner.driver.execute(sql, params))
            .await
    }

    pub async fn run(&self, statement: &Statement) -> Result<u64> {
        self.execute(&statement.sql, &statement.params).await
    }

    /// Transaction control passes the read-only guard; `None` issues nothing
    async fn control(&self, sql: Option<String>) -> Result<()> {
        let Some(sql) = sql else {
            return Ok(());
        };
        if self.inner.options.dry_run {
            info!(sql = %sql, "dry run, statement not executed");
            return Ok(());
        }
        debug!(sql = %sql, "transaction control");
        self.with_reconnect(&sql, || self.inner.driver.execute(&sql, &[]))
            .await?;
        Ok(())
    }

    /// Start a transaction, or a savepoint when one is already open
    pub async fn begin_transaction(&self) -> Result<()> {
        let depth = self.transaction_depth();
        let sql = if depth == 0 {
            self.inner.handler.begin_transaction_sql()
        } else {
            self.inner.handler.savepoint_sql(&savepoint_name(depth))
        };
        self.control(sql).await?;
        self.inner.depth.fetch_add(1, Ordering::SeqCst);
        debug!(depth = depth + 1, "transaction started");
        Ok(())
    }

    /// Commit the innermost transaction level
    pub async fn commit(&self) -> Result<()> {
        let depth = self.transaction_depth();
        let sql = match depth {
            0 => {
                return Err(Error::DatabaseError(
                    "no active transaction to commit".to_string(),
                ))
            }
            1 => self.inner.handler.commit_sql(),
            _ => self.inner.handler.release_savepoint_sql(&savepoint_name(depth - 1)),
        };
        self.control(sql).await?;
        self.inner.depth.fetch_sub(1, Ordering::SeqCst);
        debug!(depth = depth - 1, "transaction committed");
        Ok(())
    }

    /// Roll back the innermost transaction level. The level is closed even
    /// when the rollback statement fails.
    pub async fn rollback(&self) -> Result<()> {
        let depth = self.transaction_depth();
        let sql = match depth {
            0 => {
                return Err(Error::DatabaseError(
                    "no active transaction to roll back".to_string(),
                ))
            }
            1 => self.inner.handler.rollback_sql(),
            _ => self
                .inner
                .handler
                .rollback_to_savepoint_sql(&savepoint_name(depth - 1)),
        };
        self.inner.depth.fetch_sub(1, Ordering::SeqCst);
        debug!(depth = depth - 1, "transaction rolled back");
        self.control(sql).await
    }

    pub fn analyzer(&self) -> SchemaAnalyzer<'_> {
        SchemaAnalyzer::new(self)
    }

    /// Names of the existing tables
    pub async fn tables(&self) -> Result<Vec<String>> {
        self.analyzer().table_names().await
    }

    /// Introspect a table and open it for declaration. The prefix is applied.
    pub async fn table(&self, name: &str) -> Result<TableSchema> {
        let full = self.full_name(name);
        let current = self.analyzer().analyze_table(&full).await?;
        Ok(TableSchema::new(self.clone(), current))
    }

    /// Like [`Database::table`], but the table must not exist yet
    pub async fn create_table(&self, name: &str) -> Result<TableSchema> {
        let schema = self.table(name).await?;
        if schema.exists() {
            return Err(Error::table_operation(
                schema.name(),
                "cannot create a table that already exists",
            ));
        }
        Ok(schema)
    }
}
