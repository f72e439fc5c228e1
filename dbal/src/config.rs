//! Configuration handling for the DBAL

use serde::{Deserialize, Serialize};
use std::fs;

use crate::dialect::DialectKind;
use crate::error::{Error, Result};

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;

    config.database.dialect()?;
    Ok(config)
}

/// Represents the complete configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub logging: Option<LoggingConfig>,
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub prefix: String,
    /// Schemas searched for unqualified names (Postgres, Oracle).
    pub search_path: Option<Vec<String>>,
    /// Substituted for the `$user` search path token.
    pub username: Option<String>,
    pub reconnect_attempts: Option<u32>,
}

impl DatabaseConfig {
    /// Resolve the configured driver name to a dialect.
    pub fn dialect(&self) -> Result<DialectKind> {
        self.driver.parse()
    }

    /// Configured search path, or the engine's own default
    pub fn search_path(&self) -> Vec<String> {
        if let Some(path) = &self.search_path {
            return path.clone();
        }
        match self.dialect() {
            Ok(DialectKind::Postgres) => vec!["$user".to_string(), "public".to_string()],
            Ok(DialectKind::Oracle) => vec!["$user".to_string()],
            _ => Vec::new(),
        }
    }
}

/// Synchronisation behaviour
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Log rendered DDL instead of executing it.
    #[serde(default)]
    pub dry_run: bool,
    /// Wrap each table's change-set in an explicit transaction.
    #[serde(default)]
    pub transaction_per_table: bool,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn loads_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [database]
            driver = "postgres"
            url = "postgres://localhost/app"
            prefix = "app_"
            search_path = ["$user", "public"]

            [sync]
            dry_run = true
            "#
        )
        .unwrap();

        let config = load_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database.dialect().unwrap(), DialectKind::Postgres);
        assert_eq!(config.database.prefix, "app_");
        assert!(!config.database.readonly);
        assert!(config.sync.dry_run);
        assert!(!config.sync.transaction_per_table);
        assert!(config.logging.is_none());
    }

    #[test]
    fn rejects_unknown_driver() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [database]
            driver = "db2"
            url = "db2://localhost"
            "#
        )
        .unwrap();

        let err = load_from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn default_search_path() {
        let config: Config = toml::from_str(
            r#"
            [database]
            driver = "oracle"
            url = "oracle://scott@localhost/xe"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.search_path(), vec!["$user"]);

        let config: Config = toml::from_str(
            r#"
            [database]
            driver = "pgsql"
            url = "postgres://localhost/app"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.search_path(), vec!["$user", "public"]);
    }
}
