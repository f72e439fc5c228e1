//! Database module
//!
//! The driver seam, the bundled sqlx connections, the [`Database`] handle
//! and per-table change-set application.

pub mod apply;
pub mod connection;
pub mod driver;
pub mod executor;

// Re-export key types
pub use apply::{ApplyOutcome, ApplyState};
pub use connection::{DatabaseConnection, SqlxDriver};
pub use driver::{Driver, Row, Statement, Value};
pub use executor::{Database, DatabaseOptions};
