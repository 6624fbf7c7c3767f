//! Spreadsheet import: read, map, sanitize, stage and commit.

mod committer;
mod mapping;
pub mod model;
mod reader;
mod sanitizer;

pub use committer::ImportBatchCommitter;
pub use mapping::ImportMappingEngine;
pub use model::{
    BatchStatus, BatchSummary, CaseField, ColumnMapping, CommitAnnotation, CommitReport,
    FieldGuess, GroupPlan, ImportStagingBatch, MappingProposal, PlannedStep, RawRow,
    RecordOutcome, RowOutcome, RowReport, SanitizeOutcome, SanitizedValues, StagingRecord,
};
pub use reader::{read_spreadsheet, ParsedSheet};
pub use sanitizer::{group_records, parse_effect, ImportSanitizer};
