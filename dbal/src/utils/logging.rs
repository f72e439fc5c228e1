//! Logging utilities
//!
//! The library only emits `tracing` events. Without a subscriber they are
//! no-ops; applications that want output call [`init_logging`].

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Parse a configured level name, defaulting to INFO
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `RUST_LOG` first, then the configured level for this crate
fn filter(level: Level) -> Result<EnvFilter> {
    let directive = format!("dbal={}", level)
        .parse()
        .map_err(|e| Error::ConfigError(format!("Invalid log level: {}", e)))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Log file when one is configured, stdout when enabled, nothing otherwise
fn writer(config: &LoggingConfig) -> Result<Option<(BoxMakeWriter, bool)>> {
    if let Some(path) = &config.file {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        return Ok(Some((BoxMakeWriter::new(Mutex::new(file)), false)));
    }
    if config.stdout {
        return Ok(Some((BoxMakeWriter::new(std::io::stdout), true)));
    }
    Ok(None)
}

/// Install the global subscriber described by `config`
pub fn init_logging(config: &Option<LoggingConfig>) -> Result<()> {
    let Some(config) = config else {
        return Ok(());
    };
    let Some((writer, ansi)) = writer(config)? else {
        return Ok(());
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter(parse_level(&config.level))?)
        .with_writer(writer)
        .with_ansi(ansi);
    let installed = if config.format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| Error::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" warning "), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn missing_config_is_a_no_op() {
        assert!(init_logging(&None).is_ok());
    }

    #[test]
    fn silent_config_installs_nothing() {
        let config = LoggingConfig {
            level: "debug".into(),
            file: None,
            format: "text".into(),
            stdout: false,
        };
        assert!(writer(&config).unwrap().is_none());
        assert!(init_logging(&Some(config)).is_ok());
    }

    #[test]
    fn log_file_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("dbal.log");
        let config = LoggingConfig {
            level: "info".into(),
            file: Some(path.to_string_lossy().into_owned()),
            format: "json".into(),
            stdout: true,
        };
        let (_, ansi) = writer(&config).unwrap().unwrap();
        assert!(!ansi);
        assert!(path.exists());
    }
}
