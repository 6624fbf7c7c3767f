//! Row normalization, validation and grouping by case identifier.
//!
//! Problems with row data never surface as errors; they are recorded on the
//! row as warnings or a rejection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::model::{
    CaseField, ColumnMapping, GroupPlan, PlannedStep, RawRow, SanitizeOutcome, StagingRecord,
};
use crate::config::LimitsConfig;
use crate::dates::parse_date;
use crate::model::Effect;
use crate::normalize::{canonical_case_id, collapse_whitespace, fold_diacritics};
use crate::units::UnitDirectory;

/// Status texts and the effect they stand for. `None` means the row only
/// says where the case is.
const EFFECT_WORDS: &[(&str, Option<Effect>)] = &[
    ("create", None),
    ("created", None),
    ("new", None),
    ("open", None),
    ("active", None),
    ("in progress", None),
    ("criado", None),
    ("novo", None),
    ("aberto", None),
    ("autuado", None),
    ("ativo", None),
    ("em andamento", None),
    ("transfer", Some(Effect::Transfer)),
    ("transferred", Some(Effect::Transfer)),
    ("sent", Some(Effect::Transfer)),
    ("forwarded", Some(Effect::Transfer)),
    ("transferido", Some(Effect::Transfer)),
    ("transferencia", Some(Effect::Transfer)),
    ("tramitado", Some(Effect::Transfer)),
    ("em tramitacao", Some(Effect::Transfer)),
    ("encaminhado", Some(Effect::Transfer)),
    ("enviado", Some(Effect::Transfer)),
    ("remetido", Some(Effect::Transfer)),
    ("return", Some(Effect::Return)),
    ("returned", Some(Effect::Return)),
    ("sent back", Some(Effect::Return)),
    ("devolvido", Some(Effect::Return)),
    ("devolucao", Some(Effect::Return)),
    ("retornado", Some(Effect::Return)),
    ("finalize", Some(Effect::Finalize)),
    ("finalized", Some(Effect::Finalize)),
    ("closed", Some(Effect::Finalize)),
    ("archived", Some(Effect::Finalize)),
    ("done", Some(Effect::Finalize)),
    ("finalizado", Some(Effect::Finalize)),
    ("arquivado", Some(Effect::Finalize)),
    ("concluido", Some(Effect::Finalize)),
    ("encerrado", Some(Effect::Finalize)),
    ("reopen", Some(Effect::Reopen)),
    ("reopened", Some(Effect::Reopen)),
    ("reaberto", Some(Effect::Reopen)),
    ("desarquivado", Some(Effect::Reopen)),
];

/// Looks up a status text. The outer `None` means the text is not recognised.
pub fn parse_effect(raw: &str) -> Option<Option<Effect>> {
    let wanted = collapse_whitespace(&fold_diacritics(raw).to_lowercase());
    EFFECT_WORDS
        .iter()
        .find(|(word, _)| *word == wanted)
        .map(|(_, effect)| *effect)
}

/// Normalizes and groups staged rows.
#[derive(Clone)]
pub struct ImportSanitizer {
    units: Arc<dyn UnitDirectory>,
    limits: LimitsConfig,
    date_formats: Vec<String>,
}

impl ImportSanitizer {
    pub fn new(units: Arc<dyn UnitDirectory>, limits: LimitsConfig, date_formats: Vec<String>) -> Self {
        Self {
            units,
            limits,
            date_formats,
        }
    }

    pub fn sanitize(&self, rows: &[RawRow], mapping: &ColumnMapping) -> SanitizeOutcome {
        let mut records: Vec<StagingRecord> = rows.iter().map(|row| self.sanitize_row(row, mapping)).collect();
        let groups = group_records(&mut records);
        debug!(
            rows = records.len(),
            rejected = records.iter().filter(|r| r.is_rejected()).count(),
            groups = groups.len(),
            "Rows sanitized"
        );
        SanitizeOutcome { records, groups }
    }

    fn sanitize_row(&self, row: &RawRow, mapping: &ColumnMapping) -> StagingRecord {
        let mut record = StagingRecord::new(row.row_index, row.cells.clone());
        let cell = |field: &CaseField| -> Option<String> {
            mapping
                .column_of(field)
                .and_then(|col| row.cells.get(col))
                .map(|raw| collapse_whitespace(raw))
                .filter(|value| !value.is_empty())
        };

        match cell(&CaseField::CaseIdentifier) {
            None => record.reject("case identifier is empty"),
            Some(raw) => match canonical_case_id(&raw) {
                None => record.reject(format!("case identifier '{}' has no letters or digits", raw)),
                Some(id) if id.chars().count() > self.limits.identifier_max_len => record.reject(
                    format!(
                        "case identifier is longer than {} characters",
                        self.limits.identifier_max_len
                    ),
                ),
                Some(id) => record.case_id = Some(id),
            },
        }

        match cell(&CaseField::Unit) {
            None => record.reject("unit is empty"),
            Some(unit) if unit.chars().count() > self.limits.unit_max_len => record.reject(format!(
                "unit is longer than {} characters",
                self.limits.unit_max_len
            )),
            Some(unit) if !self.units.is_known(&unit) => {
                record.reject(format!("unknown unit '{}'", unit))
            }
            Some(unit) => record.values.unit = Some(unit),
        }

        if let Some(title) = cell(&CaseField::Title) {
            record.values.title = Some(self.truncated(&mut record, "title", title, self.limits.title_max_len));
        }
        if let Some(note) = cell(&CaseField::Note) {
            record.values.note = Some(self.truncated(&mut record, "note", note, self.limits.note_max_len));
        }

        if let Some(raw) = cell(&CaseField::Date) {
            match parse_date(&raw, &self.date_formats) {
                Some(date) => record.values.occurred_at = Some(date),
                None => record.reject(format!("date '{}' matches no accepted format", raw)),
            }
        }

        if let Some(raw) = cell(&CaseField::StatusEffect) {
            match parse_effect(&raw) {
                Some(effect) => record.values.effect = effect,
                None => record.warn(format!(
                    "unrecognised status '{}', read as an arrival in the row's unit",
                    raw
                )),
            }
        }

        let definitions = record
            .values
            .unit
            .as_deref()
            .map(|unit| self.units.field_definitions(unit))
            .unwrap_or_default();
        for (col, field) in mapping.iter() {
            let CaseField::Extra(name) = field else {
                continue;
            };
            let Some(raw) = row.cells.get(col).filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            match definitions.iter().find(|d| &d.name == name) {
                None => {
                    if record.values.unit.is_some() {
                        record.warn(format!(
                            "field '{}' is not defined for unit '{}'; value dropped",
                            name,
                            record.values.unit.as_deref().unwrap_or_default()
                        ));
                    }
                }
                Some(def) => {
                    match def.normalize_value(raw, &self.date_formats, self.limits.field_max_len) {
                        Ok(value) => {
                            record.values.extra_fields.insert(name.clone(), value);
                        }
                        Err(reason) if def.required => {
                            record.reject(format!("required field '{}': {}", name, reason))
                        }
                        Err(reason) => {
                            record.warn(format!("field '{}': {}; value dropped", name, reason))
                        }
                    }
                }
            }
        }

        // A required field left empty (or not mapped at all) rejects the row.
        for def in definitions.iter().filter(|d| d.required) {
            let present = mapping
                .iter()
                .filter(|(_, field)| matches!(field, CaseField::Extra(n) if *n == def.name))
                .any(|(col, _)| row.cells.get(col).is_some_and(|v| !v.trim().is_empty()));
            if !present {
                record.reject(format!(
                    "required field '{}' of unit '{}' is empty",
                    def.name,
                    record.values.unit.as_deref().unwrap_or_default()
                ));
            }
        }

        record
    }

    fn truncated(&self, record: &mut StagingRecord, what: &str, value: String, max: usize) -> String {
        if value.chars().count() <= max {
            return value;
        }
        record.warn(format!("{} truncated to {} characters", what, max));
        value.chars().take(max).collect()
    }
}

/// Groups accepted records by identifier and plans their movements.
///
/// Pass one collects groups in first-seen order. Pass two orders each group
/// by (date, row), folds consecutive same-unit arrivals into one step and
/// resolves conflicting titles and extra fields in favour of the latest row.
pub fn group_records(records: &mut [StagingRecord]) -> Vec<GroupPlan> {
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        if record.is_rejected() {
            continue;
        }
        let Some(id) = record.case_id.clone() else {
            continue;
        };
        members
            .entry(id.clone())
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(i);
    }

    order
        .into_iter()
        .map(|id| {
            let mut indices = members.remove(&id).unwrap_or_default();
            indices.sort_by_key(|&i| (records[i].values.occurred_at, records[i].row_index));
            plan_group(id, &indices, records)
        })
        .collect()
}

fn plan_group(case_id: String, indices: &[usize], records: &mut [StagingRecord]) -> GroupPlan {
    let mut steps: Vec<PlannedStep> = Vec::new();
    for &i in indices {
        let record = &mut records[i];
        record.group = Some(case_id.clone());
        let values = &record.values;
        let unit = values.unit.clone().unwrap_or_default();

        let arrival_in_same_unit = values.effect.is_none()
            && steps.last().is_some_and(|prev| prev.unit == unit);
        if let Some(prev) = steps.last_mut().filter(|_| arrival_in_same_unit) {
            prev.rows.push(record.row_index);
            if prev.note.is_none() {
                prev.note = values.note.clone();
            }
        } else {
            steps.push(PlannedStep {
                unit,
                effect: values.effect,
                occurred_at: values.occurred_at,
                note: values.note.clone(),
                rows: vec![record.row_index],
            });
        }
    }

    let title = resolve(indices, records, "title", |r| r.values.title.clone());

    let mut names: Vec<String> = indices
        .iter()
        .flat_map(|&i| records[i].values.extra_fields.keys().cloned())
        .collect();
    names.sort();
    names.dedup();
    let mut extra_fields = BTreeMap::new();
    for name in names {
        let label = format!("field '{}'", name);
        if let Some(value) = resolve(indices, records, &label, |r| {
            r.values.extra_fields.get(&name).cloned()
        }) {
            extra_fields.insert(name, value);
        }
    }

    GroupPlan {
        case_id,
        title,
        extra_fields,
        steps,
    }
}

/// Picks the value of the last row that has one and warns every row whose
/// differing value lost.
fn resolve<F>(indices: &[usize], records: &mut [StagingRecord], what: &str, value_of: F) -> Option<String>
where
    F: Fn(&StagingRecord) -> Option<String>,
{
    let (winner_row, winner) = indices
        .iter()
        .rev()
        .find_map(|&i| value_of(&records[i]).map(|v| (records[i].row_index, v)))?;

    for &i in indices {
        if let Some(value) = value_of(&records[i]) {
            if value != winner {
                records[i].warn(format!(
                    "{} '{}' superseded by '{}' from row {}",
                    what, value, winner, winner_row
                ));
            }
        }
    }
    Some(winner)
}
