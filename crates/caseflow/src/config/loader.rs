use std::collections::HashSet;
use std::path::Path;

use chrono::format::{Item, StrftimeItems};

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::units::FieldType;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

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

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
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

pub(crate) fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let mut unit_names = HashSet::new();
    for unit in &config.units {
        if unit.name.trim().is_empty() {
            return Err(ConfigError::InvalidUnit {
                unit: unit.name.clone(),
                reason: "Unit name must not be blank".to_string(),
            });
        }
        if !unit_names.insert(&unit.name) {
            return Err(ConfigError::InvalidUnit {
                unit: unit.name.clone(),
                reason: "Duplicate unit name".to_string(),
            });
        }

        let mut field_names = HashSet::new();
        for field in &unit.fields {
            if !field_names.insert(&field.name) {
                return Err(ConfigError::InvalidUnit {
                    unit: unit.name.clone(),
                    reason: format!("Duplicate field '{}'", field.name),
                });
            }
            if let FieldType::Choice { options } = &field.field_type {
                if options.is_empty() {
                    return Err(ConfigError::InvalidUnit {
                        unit: unit.name.clone(),
                        reason: format!("Choice field '{}' has no options", field.name),
                    });
                }
            }
        }
    }

    if config.import.date_formats.is_empty() {
        return Err(ConfigError::Validation {
            message: "At least one date format is required".to_string(),
        });
    }
    for format in &config.import.date_formats {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Validation {
                message: format!("Invalid date format '{}'", format),
            });
        }
    }

    let threshold = config.import.mapping_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation {
            message: format!("mapping_threshold must be in (0, 1], got {}", threshold),
        });
    }

    Ok(())
}
