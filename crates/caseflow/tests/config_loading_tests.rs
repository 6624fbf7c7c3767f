//! Table-driven tests for configuration loading and validation.

mod common;

use std::io::Write;

use caseflow::config::{load_config, load_config_from_str};
use caseflow::Caseflow;

/// Represents a single config loading test case.
struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring when loading fails.
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "database_path": "/tmp/caseflow.db",
            "units": [
                { "name": "Protocol" },
                {
                    "name": "Legal",
                    "fields": [
                        { "name": "priority", "type": "choice", "options": ["Low", "Urgent"], "required": true },
                        { "name": "opinion_date", "type": "date" }
                    ]
                }
            ],
            "limits": { "title_max_len": 200 },
            "import": {
                "max_rows": 1000,
                "accept_warnings": false,
                "date_formats": ["%d/%m/%Y", "%Y-%m-%d"]
            },
            "logging": { "filter": "caseflow=debug", "json": true }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{ "version": "3.0" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{ "units": [] }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "duplicate_field",
        config_json: r#"{
            "version": "1.0",
            "units": [{
                "name": "Legal",
                "fields": [
                    { "name": "priority", "type": "text" },
                    { "name": "priority", "type": "date" }
                ]
            }]
        }"#,
        should_succeed: false,
        expected_error: Some("Duplicate field 'priority'"),
    },
    ConfigTestCase {
        name: "choice_without_options",
        config_json: r#"{
            "version": "1.0",
            "units": [{ "name": "Legal", "fields": [{ "name": "priority", "type": "choice" }] }]
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "choice_with_empty_options",
        config_json: r#"{
            "version": "1.0",
            "units": [{ "name": "Legal", "fields": [{ "name": "priority", "type": "choice", "options": [] }] }]
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "blank_unit_name",
        config_json: r#"{ "version": "1.0", "units": [{ "name": "   " }] }"#,
        should_succeed: false,
        expected_error: Some("must not be blank"),
    },
    ConfigTestCase {
        name: "threshold_out_of_range",
        config_json: r#"{ "version": "1.0", "import": { "mapping_threshold": 1.5 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "not_json",
        config_json: "version = 1.0",
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_config_loading_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (case.should_succeed, result) {
            (true, Ok(_)) => {}
            (true, Err(e)) => panic!("{}: expected success, got {}", case.name, e),
            (false, Ok(_)) => panic!("{}: expected failure", case.name),
            (false, Err(e)) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "{}: '{}' does not mention '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn test_load_config_from_file_and_start() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db").join("cases.db");
    let config_path = dir.path().join("caseflow.json");
    let mut file = std::fs::File::create(&config_path).unwrap();
    write!(
        file,
        r#"{{ "version": "1.0", "database_path": {}, "units": [{{ "name": "Protocol" }}] }}"#,
        serde_json::to_string(&db_path.to_string_lossy()).unwrap()
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.units.len(), 1);

    Caseflow::initialize(&config).unwrap();
    assert!(db_path.exists());
}

#[test]
fn test_missing_config_file() {
    let err = load_config("/nonexistent/caseflow.json").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
