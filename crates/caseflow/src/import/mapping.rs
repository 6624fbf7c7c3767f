//! Header → field mapping proposals.

use std::collections::BTreeSet;

use super::model::{CaseField, ColumnMapping, FieldGuess, MappingProposal};
use crate::normalize::tokens;
use crate::units::FieldDefinition;

/// Highest score a header can reach without matching an alias exactly.
const MAX_FUZZY_SCORE: f64 = 0.99;

/// Proposes which spreadsheet column feeds which case field.
///
/// Stateless: the same headers always give the same proposal.
#[derive(Debug, Clone)]
pub struct ImportMappingEngine {
    fields: Vec<CaseField>,
    threshold: f64,
}

impl ImportMappingEngine {
    /// Built-in fields plus one field per configured extra field name.
    pub fn new(extra_fields: &[FieldDefinition], threshold: f64) -> Self {
        let mut fields: Vec<CaseField> = CaseField::BUILT_IN.to_vec();
        for def in extra_fields {
            let field = CaseField::Extra(def.name.clone());
            if !fields.iter().any(|f| f.canonical_name() == def.name) {
                fields.push(field);
            }
        }
        Self { fields, threshold }
    }

    pub fn fields(&self) -> &[CaseField] {
        &self.fields
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn propose_mapping<S: AsRef<str>>(&self, headers: &[S]) -> MappingProposal {
        let header_tokens: Vec<Vec<String>> = headers.iter().map(|h| tokens(h.as_ref())).collect();

        let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
        let mut best_seen = vec![0.0_f64; self.fields.len()];
        for (fi, field) in self.fields.iter().enumerate() {
            for (col, header) in header_tokens.iter().enumerate() {
                let score = score(field, header);
                best_seen[fi] = best_seen[fi].max(score);
                if score > 0.0 && score >= self.threshold {
                    candidates.push((fi, col, score));
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut assigned: Vec<Option<(usize, f64)>> = vec![None; self.fields.len()];
        let mut used_columns = BTreeSet::new();
        for (fi, col, score) in candidates {
            if assigned[fi].is_some() || used_columns.contains(&col) {
                continue;
            }
            assigned[fi] = Some((col, score));
            used_columns.insert(col);
        }

        let mut mapping = ColumnMapping::new();
        let fields = self
            .fields
            .iter()
            .zip(assigned)
            .zip(best_seen)
            .map(|((field, slot), best)| match slot {
                Some((col, score)) => {
                    mapping.assign(col, field.clone());
                    FieldGuess {
                        field: field.clone(),
                        column: Some(col),
                        header: Some(headers[col].as_ref().to_string()),
                        confidence: score,
                    }
                }
                None => FieldGuess {
                    field: field.clone(),
                    column: None,
                    header: None,
                    confidence: best,
                },
            })
            .collect();

        MappingProposal { mapping, fields }
    }
}

/// Best similarity between a header and any spelling of the field.
fn score(field: &CaseField, header: &[String]) -> f64 {
    if header.is_empty() {
        return 0.0;
    }
    let canonical = field.canonical_name();
    std::iter::once(canonical)
        .chain(field.aliases().iter().copied())
        .map(|alias| {
            let alias = tokens(alias);
            if alias == header {
                1.0
            } else {
                dice(&alias, header).min(MAX_FUZZY_SCORE)
            }
        })
        .fold(0.0, f64::max)
}

/// Dice coefficient over the distinct tokens of both sides.
fn dice(a: &[String], b: &[String]) -> f64 {
    let a: BTreeSet<&String> = a.iter().collect();
    let b: BTreeSet<&String> = b.iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    2.0 * shared as f64 / (a.len() + b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::FieldType;

    fn engine() -> ImportMappingEngine {
        ImportMappingEngine::new(
            &[FieldDefinition::new("opinion_date", FieldType::Date, false)],
            0.5,
        )
    }

    #[test]
    fn test_exact_headers_map_with_full_confidence() {
        let proposal = engine().propose_mapping(&["Case Number", "Title", "Unit", "Date"]);
        assert_eq!(proposal.mapping.column_of(&CaseField::CaseIdentifier), Some(0));
        assert_eq!(proposal.mapping.column_of(&CaseField::Title), Some(1));
        assert_eq!(proposal.mapping.column_of(&CaseField::Unit), Some(2));
        assert_eq!(proposal.mapping.column_of(&CaseField::Date), Some(3));
        for field in [
            CaseField::CaseIdentifier,
            CaseField::Title,
            CaseField::Unit,
            CaseField::Date,
        ] {
            assert_eq!(proposal.confidence(&field), 1.0);
        }
    }

    #[test]
    fn test_portuguese_headers_with_accents() {
        let proposal = engine().propose_mapping(&[
            "Número do Processo",
            "Assunto",
            "SETOR",
            "Situação",
            "Observação",
        ]);
        assert_eq!(proposal.mapping.field_at(0), Some(&CaseField::CaseIdentifier));
        assert_eq!(proposal.mapping.field_at(1), Some(&CaseField::Title));
        assert_eq!(proposal.mapping.field_at(2), Some(&CaseField::Unit));
        assert_eq!(proposal.mapping.field_at(3), Some(&CaseField::StatusEffect));
        assert_eq!(proposal.mapping.field_at(4), Some(&CaseField::Note));
    }

    #[test]
    fn test_fuzzy_match_is_below_one() {
        let proposal = engine().propose_mapping(&["Nº Processo", "Unit"]);
        assert_eq!(proposal.mapping.field_at(0), Some(&CaseField::CaseIdentifier));
        let confidence = proposal.confidence(&CaseField::CaseIdentifier);
        assert!(confidence < 1.0 && confidence >= 0.5);
    }

    #[test]
    fn test_extra_field_beats_generic_date() {
        let proposal = engine().propose_mapping(&["Opinion Date", "Date"]);
        assert_eq!(
            proposal.mapping.field_at(0),
            Some(&CaseField::Extra("opinion_date".to_string()))
        );
        assert_eq!(proposal.mapping.field_at(1), Some(&CaseField::Date));
    }

    #[test]
    fn test_ties_go_to_leftmost_column() {
        let proposal = engine().propose_mapping(&["Unit", "Unit"]);
        assert_eq!(proposal.mapping.column_of(&CaseField::Unit), Some(0));
        assert_eq!(proposal.mapping.field_at(1), None);
    }

    #[test]
    fn test_unrelated_headers_stay_unmapped() {
        let proposal = engine().propose_mapping(&["Colour", "Weight", ""]);
        assert!(proposal.mapping.is_empty());
        assert_eq!(proposal.unmapped().count(), engine().fields().len());
    }

    #[test]
    fn test_proposal_is_deterministic() {
        let headers = ["Processo", "Data", "Setor destino", "Obs"];
        assert_eq!(
            engine().propose_mapping(&headers),
            engine().propose_mapping(&headers)
        );
    }
}
