//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use caseflow::config::{Config, ImportConfig, LimitsConfig};
use caseflow::units::{FieldDefinition, FieldType, UnitConfig};
use rust_xlsxwriter::Workbook;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    database_path: Option<String>,
    units: Vec<UnitConfig>,
    limits: LimitsConfig,
    import: ImportConfig,
}

impl ConfigBuilder {
    /// Units `Protocol`, `UnitA`, `UnitB`, `Finance` and `Legal`, where
    /// `Legal` requires a `priority` choice.
    pub fn new() -> Self {
        Self {
            database_path: None,
            units: vec![],
            limits: LimitsConfig::default(),
            import: ImportConfig::default(),
        }
        .unit("Protocol", vec![])
        .unit("UnitA", vec![])
        .unit("UnitB", vec![])
        .unit("Finance", vec![FieldDefinition::new("amount", FieldType::Number, false)])
        .unit(
            "Legal",
            vec![FieldDefinition::new(
                "priority",
                FieldType::Choice {
                    options: vec!["Low".to_string(), "Urgent".to_string()],
                },
                true,
            )],
        )
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn unit(mut self, name: &str, fields: Vec<FieldDefinition>) -> Self {
        self.units.push(UnitConfig {
            name: name.to_string(),
            fields,
        });
        self
    }

    pub fn accept_warnings(mut self, accept: bool) -> Self {
        self.import.accept_warnings = accept;
        self
    }

    pub fn max_rows(mut self, rows: usize) -> Self {
        self.import.max_rows = rows;
        self
    }

    pub fn build(self) -> Config {
        Config {
            database_path: self.database_path,
            units: self.units,
            limits: self.limits,
            import: self.import,
            ..Config::default()
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for spreadsheet uploads, as CSV or XLSX bytes.
#[derive(Debug, Clone, Default)]
pub struct SheetBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SheetBuilder {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: vec![],
        }
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn csv(&self) -> Vec<u8> {
        let mut out = String::new();
        for line in std::iter::once(&self.headers).chain(self.rows.iter()) {
            let cells: Vec<String> = line
                .iter()
                .map(|c| {
                    if c.contains(',') || c.contains('"') {
                        format!("\"{}\"", c.replace('"', "\"\""))
                    } else {
                        c.clone()
                    }
                })
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn xlsx(&self) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for (r, line) in std::iter::once(&self.headers)
            .chain(self.rows.iter())
            .enumerate()
        {
            for (c, cell) in line.iter().enumerate() {
                if !cell.is_empty() {
                    worksheet
                        .write_string(r as u32, c as u16, cell.as_str())
                        .expect("write cell");
                }
            }
        }
        workbook.save_to_buffer().expect("serialize workbook")
    }
}
