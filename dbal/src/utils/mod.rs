//! Utilities for the DBAL
//!
//! Identifier naming helpers and logging setup.

pub mod logging;
pub mod naming;

pub use naming::{foreign_key_name, index_name, quote_identifier, truncate_identifier};
