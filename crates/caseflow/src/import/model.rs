//! Types shared by the import stages.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Effect;

/// A case attribute a spreadsheet column can feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseField {
    CaseIdentifier,
    Title,
    Unit,
    StatusEffect,
    Date,
    Note,
    /// A configured per-unit extra field, by name.
    Extra(String),
}

impl CaseField {
    /// The built-in fields, in proposal order.
    pub const BUILT_IN: [CaseField; 6] = [
        CaseField::CaseIdentifier,
        CaseField::Title,
        CaseField::Unit,
        CaseField::StatusEffect,
        CaseField::Date,
        CaseField::Note,
    ];

    pub fn canonical_name(&self) -> &str {
        match self {
            CaseField::CaseIdentifier => "case_identifier",
            CaseField::Title => "title",
            CaseField::Unit => "unit",
            CaseField::StatusEffect => "status_effect",
            CaseField::Date => "date",
            CaseField::Note => "note",
            CaseField::Extra(name) => name,
        }
    }

    /// Header spellings that identify this field, English and Portuguese.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            CaseField::CaseIdentifier => &[
                "case number",
                "case id",
                "case",
                "process number",
                "process",
                "protocol",
                "numero do processo",
                "processo",
                "n processo",
                "protocolo",
            ],
            CaseField::Title => &["title", "subject", "description", "assunto", "titulo", "objeto"],
            CaseField::Unit => &[
                "unit",
                "department",
                "sector",
                "destination",
                "current unit",
                "setor",
                "unidade",
                "destino",
                "setor destino",
            ],
            CaseField::StatusEffect => &[
                "status",
                "situation",
                "action",
                "movement",
                "situacao",
                "status do processo",
                "movimentacao",
            ],
            CaseField::Date => &[
                "date",
                "movement date",
                "moved at",
                "data",
                "data da movimentacao",
                "data de entrada",
            ],
            CaseField::Note => &[
                "note",
                "notes",
                "remarks",
                "comment",
                "observacao",
                "observacoes",
                "obs",
            ],
            CaseField::Extra(_) => &[],
        }
    }

    /// Fields that must be mapped before a batch can be sanitized.
    pub fn is_required(&self) -> bool {
        matches!(self, CaseField::CaseIdentifier | CaseField::Unit)
    }
}

impl fmt::Display for CaseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Source column index → case field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ColumnMapping {
    columns: BTreeMap<usize, CaseField>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style assignment; replaces whatever the column held.
    pub fn with(mut self, column: usize, field: CaseField) -> Self {
        self.assign(column, field);
        self
    }

    pub fn assign(&mut self, column: usize, field: CaseField) {
        self.columns.insert(column, field);
    }

    pub fn field_at(&self, column: usize) -> Option<&CaseField> {
        self.columns.get(&column)
    }

    pub fn column_of(&self, field: &CaseField) -> Option<usize> {
        self.columns
            .iter()
            .find(|(_, f)| *f == field)
            .map(|(c, _)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CaseField)> {
        self.columns.iter().map(|(c, f)| (*c, f))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// How well one field matched the headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldGuess {
    pub field: CaseField,
    /// Column assigned to the field, if any cleared the threshold.
    pub column: Option<usize>,
    pub header: Option<String>,
    /// Score of the assigned column, or of the best candidate when unmapped.
    pub confidence: f64,
}

/// Result of [`super::ImportMappingEngine::propose_mapping`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingProposal {
    pub mapping: ColumnMapping,
    pub fields: Vec<FieldGuess>,
}

impl MappingProposal {
    /// Confidence for a field; 0.0 when the field is unknown.
    pub fn confidence(&self, field: &CaseField) -> f64 {
        self.fields
            .iter()
            .find(|g| &g.field == field)
            .map(|g| g.confidence)
            .unwrap_or(0.0)
    }

    pub fn unmapped(&self) -> impl Iterator<Item = &FieldGuess> {
        self.fields.iter().filter(|g| g.column.is_none())
    }
}

/// A non-blank data row as read from the upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    /// 1-based spreadsheet row number; the header is row 1.
    pub row_index: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Ok,
    Warning,
    Rejected,
}

/// Values of a row after normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedValues {
    pub title: Option<String>,
    pub unit: Option<String>,
    /// Explicit effect named by the row; `None` means plain arrival in the unit.
    pub effect: Option<Effect>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

/// What happened to a row when the batch was committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommitAnnotation {
    Committed { case_id: String, sequences: Vec<u32> },
    Failed { reason: String },
    Skipped { reason: String },
}

/// One source row through sanitizing and commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StagingRecord {
    pub row_index: usize,
    pub raw: Vec<String>,
    pub case_id: Option<String>,
    pub values: SanitizedValues,
    pub outcome: RecordOutcome,
    pub reasons: Vec<String>,
    /// Normalized identifier of the group the row joined; `None` when rejected.
    pub group: Option<String>,
    pub commit: Option<CommitAnnotation>,
}

impl StagingRecord {
    pub fn new(row_index: usize, raw: Vec<String>) -> Self {
        Self {
            row_index,
            raw,
            case_id: None,
            values: SanitizedValues::default(),
            outcome: RecordOutcome::Ok,
            reasons: Vec::new(),
            group: None,
            commit: None,
        }
    }

    /// Adds a warning unless the row is already rejected.
    pub fn warn(&mut self, reason: impl Into<String>) {
        if self.outcome == RecordOutcome::Ok {
            self.outcome = RecordOutcome::Warning;
        }
        self.reasons.push(reason.into());
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.outcome = RecordOutcome::Rejected;
        self.reasons.push(reason.into());
    }

    pub fn is_rejected(&self) -> bool {
        self.outcome == RecordOutcome::Rejected
    }
}

/// One movement the import wants to apply to a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub unit: String,
    pub effect: Option<Effect>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    /// Source rows folded into this step, ascending.
    pub rows: Vec<usize>,
}

/// Everything the import will do to one case, in application order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupPlan {
    pub case_id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
    pub steps: Vec<PlannedStep>,
}

impl GroupPlan {
    /// Every source row in the group, ascending.
    pub fn rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.steps.iter().flat_map(|s| s.rows.iter().copied()).collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

/// Output of [`super::ImportSanitizer::sanitize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeOutcome {
    pub records: Vec<StagingRecord>,
    /// One plan per case identifier, in first-seen order.
    pub groups: Vec<GroupPlan>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    PendingMapping,
    PendingConfirmation,
    Committed,
    Discarded,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::PendingMapping => "pending_mapping",
            BatchStatus::PendingConfirmation => "pending_confirmation",
            BatchStatus::Committed => "committed",
            BatchStatus::Discarded => "discarded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_mapping" => Some(BatchStatus::PendingMapping),
            "pending_confirmation" => Some(BatchStatus::PendingConfirmation),
            "committed" => Some(BatchStatus::Committed),
            "discarded" => Some(BatchStatus::Discarded),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Committed | BatchStatus::Discarded)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded spreadsheet on its way into the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportStagingBatch {
    pub id: String,
    pub created_by: String,
    pub status: BatchStatus,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub proposal: MappingProposal,
    pub confirmed_mapping: Option<ColumnMapping>,
    pub records: Vec<StagingRecord>,
    pub groups: Vec<GroupPlan>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl ImportStagingBatch {
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total_rows: self.rows.len(),
            groups: self.groups.len(),
            ..Default::default()
        };
        for record in &self.records {
            match record.outcome {
                RecordOutcome::Ok => summary.ok += 1,
                RecordOutcome::Warning => summary.warnings += 1,
                RecordOutcome::Rejected => summary.rejected += 1,
            }
            match record.commit {
                Some(CommitAnnotation::Committed { .. }) => summary.committed += 1,
                Some(CommitAnnotation::Failed { .. }) => summary.failed += 1,
                Some(CommitAnnotation::Skipped { .. }) => summary.skipped += 1,
                None => {}
            }
        }
        summary
    }
}

/// Row counts shown on the preview and after commit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_rows: usize,
    pub ok: usize,
    pub warnings: usize,
    pub rejected: usize,
    pub groups: usize,
    pub committed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    Ok,
    Warning,
    Rejected,
    Committed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowReport {
    pub row_index: usize,
    pub outcome: RowOutcome,
    pub reasons: Vec<String>,
    pub case_id: Option<String>,
    pub sequences: Vec<u32>,
}

impl From<&StagingRecord> for RowReport {
    fn from(record: &StagingRecord) -> Self {
        let mut reasons = record.reasons.clone();
        let (outcome, sequences) = match &record.commit {
            Some(CommitAnnotation::Committed { sequences, .. }) => {
                (RowOutcome::Committed, sequences.clone())
            }
            Some(CommitAnnotation::Failed { reason }) => {
                reasons.push(reason.clone());
                (RowOutcome::Failed, Vec::new())
            }
            Some(CommitAnnotation::Skipped { reason }) => {
                reasons.push(reason.clone());
                (RowOutcome::Skipped, Vec::new())
            }
            None => match record.outcome {
                RecordOutcome::Ok => (RowOutcome::Ok, Vec::new()),
                RecordOutcome::Warning => (RowOutcome::Warning, Vec::new()),
                RecordOutcome::Rejected => (RowOutcome::Rejected, Vec::new()),
            },
        };
        Self {
            row_index: record.row_index,
            outcome,
            reasons,
            case_id: record.case_id.clone(),
            sequences,
        }
    }
}

/// Result of [`super::ImportBatchCommitter::commit`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub batch_id: String,
    /// False when any group failed and nothing was written.
    pub committed: bool,
    pub rows: Vec<RowReport>,
    pub summary: BatchSummary,
}

impl CommitReport {
    pub fn row(&self, row_index: usize) -> Option<&RowReport> {
        self.rows.iter().find(|r| r.row_index == row_index)
    }
}
