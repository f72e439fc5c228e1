//! Error types for the DBAL

use thiserror::Error;

use crate::db::driver::Statement;

/// Result type for DBAL operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the DBAL
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Catalog query failed or returned an unparseable shape.
    #[error("Schema introspection error on `{table}`: {message}")]
    SchemaIntrospectionError { table: String, message: String },

    /// The diff classified a change the target dialect cannot express.
    #[error("Unsupported alteration of `{table}`.`{column}`: {message}")]
    UnsupportedAlterationError {
        table: String,
        column: String,
        message: String,
    },

    /// Dialect pre-flight validation rejected a column definition.
    #[error("Invalid configuration for column `{table}`.`{column}`: {message}")]
    InvalidColumnConfigurationError {
        table: String,
        column: String,
        message: String,
    },

    /// A rendered DDL statement failed while applying a change-set.
    #[error("DDL execution failed on `{table}` ({statement}): {source}")]
    DdlExecutionError {
        table: String,
        statement: Statement,
        #[source]
        source: Box<Error>,
    },

    #[error("Connection is read-only, refusing to execute: {sql}")]
    ReadonlyConnectionError { sql: String },

    #[error("Table operation error on `{table}`: {message}")]
    TableOperationError { table: String, message: String },
}

impl Error {
    /// Errors that abort only the affected table during synchronisation.
    ///
    /// Everything else (execution failures, connection problems) stops the
    /// whole multi-table sync.
    pub fn is_table_scoped(&self) -> bool {
        matches!(
            self,
            Error::SchemaIntrospectionError { .. }
                | Error::UnsupportedAlterationError { .. }
                | Error::InvalidColumnConfigurationError { .. }
                | Error::TableOperationError { .. }
        )
    }

    /// Engine error code and message, used for connection-loss detection.
    pub fn code_and_message(&self) -> (Option<String>, String) {
        match self {
            Error::SqlxError(sqlx::Error::Database(db_err)) => (
                db_err.code().map(|code| code.into_owned()),
                db_err.message().to_string(),
            ),
            Error::DdlExecutionError { source, .. } => source.code_and_message(),
            other => (None, other.to_string()),
        }
    }

    pub(crate) fn introspection(table: &str, message: impl Into<String>) -> Self {
        Error::SchemaIntrospectionError {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(table: &str, column: &str, message: impl Into<String>) -> Self {
        Error::UnsupportedAlterationError {
            table: table.to_string(),
            column: column.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_column(table: &str, column: &str, message: impl Into<String>) -> Self {
        Error::InvalidColumnConfigurationError {
            table: table.to_string(),
            column: column.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn table_operation(table: &str, message: impl Into<String>) -> Self {
        Error::TableOperationError {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

/// Convert TOML deserialization errors to DBAL errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}
