//! Per-unit extra field definitions and the lookup the ledger consults.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dates;
use crate::normalize::{collapse_whitespace, fold_diacritics};

/// Closed set of data types an extra field may hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Date,
    Number,
    Choice {
        #[serde(default)]
        options: Vec<String>,
    },
}

/// One configured extra field of a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required,
        }
    }

    /// Normalizes a raw value for storage or explains why it is invalid.
    ///
    /// Dates are stored as `YYYY-MM-DD`, numbers in their shortest decimal
    /// form, choices as the configured spelling of the matched option.
    pub fn normalize_value<S: AsRef<str>>(
        &self,
        raw: &str,
        date_formats: &[S],
        max_len: usize,
    ) -> Result<String, String> {
        let value = collapse_whitespace(raw);
        match &self.field_type {
            FieldType::Text => {
                if value.chars().count() > max_len {
                    Err(format!("longer than {} characters", max_len))
                } else {
                    Ok(value)
                }
            }
            FieldType::Date => dates::parse_date(&value, date_formats)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .ok_or_else(|| format!("'{}' is not a recognised date", value)),
            FieldType::Number => parse_number(&value)
                .map(|n| n.to_string())
                .ok_or_else(|| format!("'{}' is not a number", value)),
            FieldType::Choice { options } => {
                let wanted = fold_diacritics(&value).to_lowercase();
                options
                    .iter()
                    .find(|o| fold_diacritics(o).to_lowercase() == wanted)
                    .cloned()
                    .ok_or_else(|| {
                        format!("'{}' is not one of: {}", value, options.join(", "))
                    })
            }
        }
    }
}

/// Accepts `1234.5`, `1234,5` and `1.234,5`.
fn parse_number(value: &str) -> Option<f64> {
    if let Ok(n) = value.parse::<f64>() {
        return n.is_finite().then_some(n);
    }
    let swapped = if value.contains(',') {
        value.replace('.', "").replace(',', ".")
    } else {
        return None;
    };
    swapped.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A unit and the extra fields it defines, in display order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitConfig {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Unit configuration lookup.
pub trait UnitDirectory: Send + Sync {
    /// Field definitions for a unit, empty when the unit defines none.
    fn field_definitions(&self, unit: &str) -> Vec<FieldDefinition>;

    /// Whether a unit may own cases.
    fn is_known(&self, unit: &str) -> bool;

    /// Every field defined by any unit, first definition wins on name clashes.
    fn all_fields(&self) -> Vec<FieldDefinition>;
}

/// Directory built once from configuration.
///
/// An empty directory accepts every unit name and defines no fields.
#[derive(Debug, Clone, Default)]
pub struct StaticUnitDirectory {
    units: Vec<UnitConfig>,
}

impl StaticUnitDirectory {
    pub fn new(units: Vec<UnitConfig>) -> Self {
        Self { units }
    }

    fn unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.name == name)
    }
}

impl UnitDirectory for StaticUnitDirectory {
    fn field_definitions(&self, unit: &str) -> Vec<FieldDefinition> {
        self.unit(unit).map(|u| u.fields.clone()).unwrap_or_default()
    }

    fn is_known(&self, unit: &str) -> bool {
        self.units.is_empty() || self.unit(unit).is_some()
    }

    fn all_fields(&self) -> Vec<FieldDefinition> {
        let mut seen = BTreeSet::new();
        let mut fields = Vec::new();
        for field in self.units.iter().flat_map(|u| u.fields.iter()) {
            if seen.insert(field.name.clone()) {
                fields.push(field.clone());
            }
        }
        fields
    }
}

/// Validates `values` against `definitions`.
///
/// Unknown names and malformed values are errors. With `enforce_required`,
/// required fields must be present and non-empty. Returns the normalized map
/// on success or `(field, reason)` for the first problem found.
pub fn validate_fields<S: AsRef<str>>(
    definitions: &[FieldDefinition],
    values: &BTreeMap<String, String>,
    date_formats: &[S],
    max_len: usize,
    enforce_required: bool,
) -> Result<BTreeMap<String, String>, (String, String)> {
    let mut normalized = BTreeMap::new();

    for (name, raw) in values {
        let def = definitions
            .iter()
            .find(|d| &d.name == name)
            .ok_or_else(|| (name.clone(), "field is not defined for this unit".to_string()))?;
        if raw.trim().is_empty() {
            continue;
        }
        let value = def
            .normalize_value(raw, date_formats, max_len)
            .map_err(|reason| (name.clone(), reason))?;
        normalized.insert(name.clone(), value);
    }

    if enforce_required {
        if let Some(missing) = definitions
            .iter()
            .find(|d| d.required && !normalized.contains_key(&d.name))
        {
            return Err((missing.name.clone(), "required field is missing".to_string()));
        }
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::DEFAULT_DATE_FORMATS;

    fn legal() -> UnitConfig {
        UnitConfig {
            name: "Legal".to_string(),
            fields: vec![
                FieldDefinition::new("opinion_date", FieldType::Date, true),
                FieldDefinition::new("amount", FieldType::Number, false),
                FieldDefinition::new(
                    "priority",
                    FieldType::Choice {
                        options: vec!["Low".to_string(), "Urgent".to_string()],
                    },
                    false,
                ),
            ],
        }
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_field_definition_deserializes_flat() {
        let def: FieldDefinition = serde_json::from_str(
            r#"{"name": "priority", "type": "choice", "options": ["a", "b"], "required": true}"#,
        )
        .unwrap();
        assert!(def.required);
        assert_eq!(
            def.field_type,
            FieldType::Choice {
                options: vec!["a".to_string(), "b".to_string()]
            }
        );

        let def: FieldDefinition =
            serde_json::from_str(r#"{"name": "notes", "type": "text"}"#).unwrap();
        assert_eq!(def.field_type, FieldType::Text);
        assert!(!def.required);
    }

    #[test]
    fn test_normalize_values() {
        let unit = legal();
        let date = &unit.fields[0];
        let number = &unit.fields[1];
        let choice = &unit.fields[2];

        assert_eq!(
            date.normalize_value("10/01/2024", DEFAULT_DATE_FORMATS, 100).unwrap(),
            "2024-01-10"
        );
        assert_eq!(
            number.normalize_value("1.234,5", DEFAULT_DATE_FORMATS, 100).unwrap(),
            "1234.5"
        );
        assert_eq!(
            choice.normalize_value("urgent", DEFAULT_DATE_FORMATS, 100).unwrap(),
            "Urgent"
        );
        assert!(choice.normalize_value("soon", DEFAULT_DATE_FORMATS, 100).is_err());
        assert!(number.normalize_value("abc", DEFAULT_DATE_FORMATS, 100).is_err());
    }

    #[test]
    fn test_validate_fields_requires_required() {
        let unit = legal();
        let err = validate_fields(
            &unit.fields,
            &values(&[("amount", "10")]),
            DEFAULT_DATE_FORMATS,
            100,
            true,
        )
        .unwrap_err();
        assert_eq!(err.0, "opinion_date");

        let ok = validate_fields(
            &unit.fields,
            &values(&[("amount", "10")]),
            DEFAULT_DATE_FORMATS,
            100,
            false,
        )
        .unwrap();
        assert_eq!(ok.get("amount").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_validate_fields_rejects_unknown_names() {
        let unit = legal();
        let err = validate_fields(
            &unit.fields,
            &values(&[("opinion_date", "2024-01-01"), ("colour", "red")]),
            DEFAULT_DATE_FORMATS,
            100,
            true,
        )
        .unwrap_err();
        assert_eq!(err.0, "colour");
    }

    #[test]
    fn test_empty_directory_accepts_any_unit() {
        let dir = StaticUnitDirectory::default();
        assert!(dir.is_known("Anything"));
        assert!(dir.field_definitions("Anything").is_empty());
    }

    #[test]
    fn test_configured_directory() {
        let mut other = legal();
        other.name = "Finance".to_string();
        other.fields.push(FieldDefinition::new("cost_centre", FieldType::Text, false));
        let dir = StaticUnitDirectory::new(vec![legal(), other]);

        assert!(dir.is_known("Legal"));
        assert!(!dir.is_known("Marketing"));
        assert_eq!(dir.field_definitions("Legal").len(), 3);

        let names: Vec<String> = dir.all_fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["opinion_date", "amount", "priority", "cost_centre"]);
    }
}
