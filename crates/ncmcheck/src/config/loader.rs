use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

/// Environment variable that replaces `database_path` from the file.
pub const DATABASE_PATH_ENV: &str = "NCMCHECK_DATABASE_PATH";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;
    apply_env_overrides(&mut config);

    validate_config(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
        if !path.trim().is_empty() {
            log::debug!("Using database path from {}", DATABASE_PATH_ENV);
            config.database_path = Some(PathBuf::from(path));
        }
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.runner.record_concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "runner.record_concurrency must be at least 1".to_string(),
        });
    }

    if config.classifier.command.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "classifier.command must not be blank".to_string(),
        });
    }

    // A lease shorter than one classifier call would expire while a record is in flight.
    if config.queue.lease_secs <= config.classifier.timeout_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "queue.lease_secs ({}) must be greater than classifier.timeout_secs ({})",
                config.queue.lease_secs, config.classifier.timeout_secs
            ),
        });
    }

    Ok(())
}

impl Config {
    /// The database file to open: the configured path or the default location.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const MINIMAL: &str = r#"
    {
        "version": "1.0",
        "classifier": { "command": "python3", "args": ["classify.py"] }
    }
    "#;

    #[test]
    #[serial]
    fn test_load_minimal_config_applies_defaults() {
        std::env::remove_var(DATABASE_PATH_ENV);
        let config = load_config_from_str(MINIMAL).unwrap();

        assert_eq!(config.version, "1.0");
        assert_eq!(config.classifier.command, "python3");
        assert_eq!(config.classifier.args, vec!["classify.py"]);
        assert_eq!(config.classifier.timeout_secs, 30);
        assert_eq!(config.runner.record_concurrency, 4);
        assert_eq!(config.queue.lease_secs, 300);
        assert_eq!(config.queue.poll_interval_ms, 500);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.worker_count >= 1);
        assert!(config.database_path.is_none());
    }

    #[test]
    #[serial]
    fn test_load_full_config() {
        std::env::remove_var(DATABASE_PATH_ENV);
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/ncmcheck/ncmcheck.db",
            "worker_count": 2,
            "classifier": { "command": "./classify", "timeout_secs": 10 },
            "runner": { "record_concurrency": 8 },
            "queue": {
                "lease_secs": 120,
                "poll_interval_ms": 250,
                "recover_interval_secs": 15,
                "max_backoff_secs": 5,
                "max_attempts": 5
            },
            "logging": { "level": "debug", "json": true }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/ncmcheck/ncmcheck.db"))
        );
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.classifier.timeout().as_secs(), 10);
        assert_eq!(config.runner.record_concurrency, 8);
        assert_eq!(config.queue.poll_interval().as_millis(), 250);
        assert_eq!(config.queue.recover_interval().as_secs(), 15);
        assert_eq!(config.queue.max_backoff().as_secs(), 5);
        assert_eq!(config.queue.max_attempts, 5);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_version() {
        let config_json = r#"
        { "version": "2.0", "classifier": { "command": "x" } }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_missing_classifier_fails_schema() {
        let err = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_zero_worker_count_fails_schema() {
        let config_json = r#"
        { "version": "1.0", "worker_count": 0, "classifier": { "command": "x" } }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_zero_max_attempts_fails_schema() {
        let config_json = r#"
        { "version": "1.0", "classifier": { "command": "x" }, "queue": { "max_attempts": 0 } }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_unknown_field_fails_schema() {
        let config_json = r#"
        { "version": "1.0", "classifier": { "command": "x" }, "input_directory": "/in" }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_blank_command_rejected() {
        let config_json = r#"
        { "version": "1.0", "classifier": { "command": "   " } }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_lease_must_outlast_timeout() {
        let config_json = r#"
        {
            "version": "1.0",
            "classifier": { "command": "x", "timeout_secs": 60 },
            "queue": { "lease_secs": 60 }
        }
        "#;

        let err = load_config_from_str(config_json).unwrap_err();
        assert!(err.to_string().contains("lease_secs"));
    }

    #[test]
    fn test_malformed_json() {
        let err = load_config_from_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/ncmcheck.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides_database_path() {
        std::env::set_var(DATABASE_PATH_ENV, "/tmp/override.db");
        let config = load_config_from_str(MINIMAL);
        std::env::remove_var(DATABASE_PATH_ENV);

        let config = config.unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(
            config.resolved_database_path(),
            Some(PathBuf::from("/tmp/override.db"))
        );
    }
}
