//! DBAL: schema introspection, diffing and synchronisation
//!
//! Reads the live state of tables on MySQL, PostgreSQL, SQLite, SQL Server
//! and Oracle, lets callers declare the state they want, and applies the
//! minimal ordered DDL that gets there.
//!
//! ```no_run
//! use dbal::{AbstractType, Column, SaveMode};
//!
//! # async fn example() -> dbal::Result<()> {
//! let db = dbal::init("dbal.toml").await?;
//! let mut users = db.table("users").await?;
//! users
//!     .column(Column::new("id", AbstractType::Primary))
//!     .column(Column::new("email", AbstractType::String).size(190));
//! users.index(&["email"], true);
//! users.save(SaveMode::ALL).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod schema;
pub mod utils;

// Re-export main types for easier access
pub use config::Config;
pub use db::{Database, DatabaseOptions, Driver, Row, Statement, Value};
pub use dialect::{DialectKind, Handler};
pub use error::{Error, Result};
pub use schema::{
    AbstractType, ChangeSet, Column, DefaultValue, ForeignKey, ForeignKeyAction, Index, Operation,
    SaveMode, SchemaAnalyzer, SyncReport, Synchronizer, TableSchema, TableState,
};

/// Load the configuration file, install logging and connect
pub async fn init(config_path: &str) -> Result<Database> {
    let config = config::load_from_file(config_path)?;
    utils::logging::init_logging(&config.logging)?;
    tracing::info!(driver = %config.database.driver, "initialising database handle");
    Database::connect(&config).await
}
