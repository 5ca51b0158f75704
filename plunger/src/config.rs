//! Configuration loading for the plunger sink.
//!
//! The configuration is stored in TOML format and defines:
//! - Sink settings (database path, minimum recorded log level)
//! - Attribute names to promote into the registry when the store opens

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Path to the SQLite database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Minimum level recorded by the `log` command.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./plunger.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
        }
    }
}

/// Attribute names promoted into the registry at open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub names: Vec<String>,
}

/// Complete plunger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlungerConfig {
    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Reject empty or repeated names (pure function).
fn check_names<'a>(names: impl IntoIterator<Item = &'a String>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Schema names must not be empty".to_string(),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Duplicate schema name: {name}"
            )));
        }
    }
    Ok(())
}

impl PlungerConfig {
    /// Load configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: PlungerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an unknown log level or
    /// an empty or duplicate schema name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.sink.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log level '{}', expected one of: {}",
                self.sink.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        check_names(&self.schema.names)
    }

    /// The configured minimum level as a filter.
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        self.sink.log_level.parse().unwrap_or(LevelFilter::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let config = PlungerConfig::parse("")?;
        assert_eq!(config.sink.db_path, PathBuf::from("./plunger.db"));
        assert_eq!(config.sink.log_level, "info");
        assert!(config.schema.names.is_empty());
        assert_eq!(config.level_filter(), LevelFilter::INFO);
        Ok(())
    }

    #[test]
    fn test_parse_full_config() -> Result<(), Box<dyn std::error::Error>> {
        let toml = r#"
[sink]
db_path = "/var/lib/plunger/events.db"
log_level = "debug"

[schema]
names = ["foo", "bar"]
"#;
        let config = PlungerConfig::parse(toml)?;
        assert_eq!(config.sink.db_path, PathBuf::from("/var/lib/plunger/events.db"));
        assert_eq!(config.level_filter(), LevelFilter::DEBUG);
        assert_eq!(config.schema.names, vec!["foo", "bar"]);
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let Err(err) = PlungerConfig::parse("[sink]\nlog_level = \"loud\"\n") else {
            panic!("expected log level validation to fail");
        };
        assert!(err.to_string().contains("Unknown log level 'loud'"));
    }

    #[test]
    fn test_rejects_duplicate_schema_names() {
        let Err(err) = PlungerConfig::parse("[schema]\nnames = [\"foo\", \"foo\"]\n") else {
            panic!("expected duplicate name validation to fail");
        };
        assert!(err.to_string().contains("Duplicate schema name: foo"));
    }

    #[test]
    fn test_rejects_empty_schema_name() {
        let config = PlungerConfig {
            schema: SchemaConfig {
                names: vec!["ok".to_string(), "  ".to_string()],
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = PlungerConfig::parse("[sink\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("plunger.toml");
        std::fs::write(&path, "[schema]\nnames = [\"user\"]\n")?;

        let config = PlungerConfig::load(&path)?;
        assert_eq!(config.schema.names, vec!["user"]);

        let missing = PlungerConfig::load(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError(_))));
        Ok(())
    }
}
