use serde::{Deserialize, Serialize};

use crate::dates::DEFAULT_DATE_FORMATS;
use crate::units::UnitConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file; defaults to `~/.caseflow/data/caseflow.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            units: Vec::new(),
            limits: LimitsConfig::default(),
            import: ImportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Maximum lengths, in characters, for stored text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
    #[serde(default = "default_identifier_max_len")]
    pub identifier_max_len: usize,
    #[serde(default = "default_title_max_len")]
    pub title_max_len: usize,
    #[serde(default = "default_unit_max_len")]
    pub unit_max_len: usize,
    #[serde(default = "default_note_max_len")]
    pub note_max_len: usize,
    #[serde(default = "default_field_max_len")]
    pub field_max_len: usize,
}

fn default_identifier_max_len() -> usize {
    64
}

fn default_title_max_len() -> usize {
    500
}

fn default_unit_max_len() -> usize {
    120
}

fn default_note_max_len() -> usize {
    2000
}

fn default_field_max_len() -> usize {
    500
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            identifier_max_len: default_identifier_max_len(),
            title_max_len: default_title_max_len(),
            unit_max_len: default_unit_max_len(),
            note_max_len: default_note_max_len(),
            field_max_len: default_field_max_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportConfig {
    /// Upload size limit in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Data rows allowed per upload, header excluded.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_max_columns")]
    pub max_columns: usize,
    /// Minimum header similarity (0..=1) for a proposed mapping.
    #[serde(default = "default_mapping_threshold")]
    pub mapping_threshold: f64,
    /// Whether groups containing warnings are committed.
    #[serde(default = "default_true")]
    pub accept_warnings: bool,
    /// chrono formats tried in order when parsing dates.
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
}

fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_rows() -> usize {
    5_000
}

fn default_max_columns() -> usize {
    64
}

fn default_mapping_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_date_formats() -> Vec<String> {
    DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_rows: default_max_rows(),
            max_columns: default_max_columns(),
            mapping_threshold: default_mapping_threshold(),
            accept_warnings: true,
            date_formats: default_date_formats(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}
