//! Database connection handling
//!
//! sqlx-backed [`Driver`] implementations. Each logical database gets one
//! physical connection: the pools are capped at a single connection that is
//! never recycled, so session state such as open transactions and SQLite
//! in-memory databases survives between statements.

use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPoolOptions, MySqlRow},
    postgres::{PgPoolOptions, PgRow},
    sqlite::{SqlitePoolOptions, SqliteRow},
    Column as _, MySql, Pool, Postgres, Row as _, Sqlite,
};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::db::driver::{Driver, Row, Value};
use crate::dialect::DialectKind;
use crate::error::{Error, Result};

/// Enumeration of supported database types
#[derive(Debug, Clone)]
pub enum DatabaseConnection {
    Postgres(Pool<Postgres>),
    MySql(Pool<MySql>),
    Sqlite(Pool<Sqlite>),
}

/// Bind every [`Value`] onto a sqlx query
macro_rules! bind_values {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param.clone() {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(b),
                Value::Int(i) => query.bind(i),
                Value::Float(f) => query.bind(f),
                Value::Text(s) => query.bind(s),
                Value::Bytes(b) => query.bind(b),
            };
        }
        query
    }};
}

/// Decode a column by trying each listed type in turn
macro_rules! decode_column {
    ($row:expr, $index:expr, [$($ty:ty => $variant:expr),+ $(,)?]) => {{
        let mut decoded = None;
        $(
            if decoded.is_none() {
                if let Ok(value) = $row.try_get::<Option<$ty>, _>($index) {
                    decoded = Some(value.map($variant).unwrap_or(Value::Null));
                }
            }
        )+
        decoded.unwrap_or(Value::Null)
    }};
}

fn sqlite_row(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_column!(row, i, [
            i64 => Value::Int,
            f64 => Value::Float,
            String => Value::Text,
            Vec<u8> => Value::Bytes,
        ]);
        out.insert(column.name(), value);
    }
    out
}

fn mysql_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_column!(row, i, [
            i64 => Value::Int,
            u64 => |v: u64| Value::Int(v as i64),
            f64 => Value::Float,
            String => Value::Text,
            Vec<u8> => Value::Bytes,
        ]);
        out.insert(column.name(), value);
    }
    out
}

fn postgres_row(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_column!(row, i, [
            bool => Value::Bool,
            i16 => |v: i16| Value::Int(v.into()),
            i32 => |v: i32| Value::Int(v.into()),
            i64 => Value::Int,
            f32 => |v: f32| Value::Float(v.into()),
            f64 => Value::Float,
            String => Value::Text,
            Vec<u8> => Value::Bytes,
        ]);
        out.insert(column.name(), value);
    }
    out
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));

        match config.dialect()? {
            DialectKind::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(timeout)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::Postgres(pool))
            }
            DialectKind::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(timeout)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::MySql(pool))
            }
            DialectKind::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(timeout)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::Sqlite(pool))
            }
            other => Err(Error::ConfigError(format!(
                "No bundled driver for {}; supply one through Database::with_driver",
                other
            ))),
        }
    }

    pub fn dialect(&self) -> DialectKind {
        match self {
            DatabaseConnection::Postgres(_) => DialectKind::Postgres,
            DatabaseConnection::MySql(_) => DialectKind::MySql,
            DatabaseConnection::Sqlite(_) => DialectKind::Sqlite,
        }
    }

    /// Run a row-returning statement
    pub async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            DatabaseConnection::Postgres(pool) => {
                let rows = bind_values!(sqlx::query(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(postgres_row).collect())
            }
            DatabaseConnection::MySql(pool) => {
                let rows = bind_values!(sqlx::query(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(mysql_row).collect())
            }
            DatabaseConnection::Sqlite(pool) => {
                let rows = bind_values!(sqlx::query(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(sqlite_row).collect())
            }
        }
    }

    /// Execute a SQL statement
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let affected = match self {
            DatabaseConnection::Postgres(pool) => {
                bind_values!(sqlx::query(sql), params).execute(pool).await?.rows_affected()
            }
            DatabaseConnection::MySql(pool) => {
                bind_values!(sqlx::query(sql), params).execute(pool).await?.rows_affected()
            }
            DatabaseConnection::Sqlite(pool) => {
                bind_values!(sqlx::query(sql), params).execute(pool).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    pub async fn close(&self) {
        match self {
            DatabaseConnection::Postgres(pool) => pool.close().await,
            DatabaseConnection::MySql(pool) => pool.close().await,
            DatabaseConnection::Sqlite(pool) => pool.close().await,
        }
    }
}

/// [`Driver`] over a single sqlx connection that can be re-established
pub struct SqlxDriver {
    config: DatabaseConfig,
    dialect: DialectKind,
    connection: RwLock<DatabaseConnection>,
}

impl SqlxDriver {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let connection = DatabaseConnection::connect(config).await?;
        info!(driver = %connection.dialect(), "connected to database");
        Ok(Self {
            config: config.clone(),
            dialect: connection.dialect(),
            connection: RwLock::new(connection),
        })
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    fn dialect(&self) -> DialectKind {
        self.dialect
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.connection.read().await.fetch(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.connection.read().await.execute(sql, params).await
    }

    async fn reconnect(&self) -> Result<()> {
        let mut connection = self.connection.write().await;
        warn!(driver = %self.dialect, "re-establishing database connection");
        connection.close().await;
        *connection = DatabaseConnection::connect(&self.config).await?;
        Ok(())
    }
}
