use std::path::PathBuf;
use thiserror::Error;

use crate::permission::Action;

#[derive(Error, Debug)]
pub enum CaseflowError {
    #[error("Permission denied: {actor} may not {action} on unit '{unit}'")]
    PermissionDenied {
        actor: String,
        action: Action,
        unit: String,
    },

    #[error("Validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Concurrent modification of case '{case_id}', retry the operation")]
    Conflict { case_id: String },

    #[error("Unreadable spreadsheet: {0}")]
    Format(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl CaseflowError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn case_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Case",
            id: id.into(),
        }
    }

    pub fn batch_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Import batch",
            id: id.into(),
        }
    }

    /// Only lost races are safe to retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<rusqlite::Error> for CaseflowError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid unit '{unit}': {reason}")]
    InvalidUnit { unit: String, reason: String },

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, CaseflowError>;
