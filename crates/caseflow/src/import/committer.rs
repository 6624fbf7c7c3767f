//! Staging, mapping confirmation and commit of spreadsheet imports.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use super::mapping::ImportMappingEngine;
use super::model::{
    BatchStatus, CaseField, ColumnMapping, CommitAnnotation, CommitReport, GroupPlan,
    ImportStagingBatch, RecordOutcome, RowReport, StagingRecord,
};
use super::reader::read_spreadsheet;
use super::sanitizer::ImportSanitizer;
use crate::config::{ImportConfig, LimitsConfig};
use crate::db::batch_repo::{self, BatchRow};
use crate::db::case_repo::timestamp;
use crate::db::{Database, DatabaseError};
use crate::error::{CaseflowError, Result};
use crate::ledger::{CaseLedger, GroupOutcome, ImportApplication};
use crate::permission::{Action, Actor};
use crate::units::UnitDirectory;

/// Drives a batch through pending-mapping → pending-confirmation → committed.
#[derive(Clone)]
pub struct ImportBatchCommitter {
    db: Database,
    ledger: CaseLedger,
    engine: ImportMappingEngine,
    sanitizer: ImportSanitizer,
    config: ImportConfig,
}

impl ImportBatchCommitter {
    pub fn new(
        db: Database,
        ledger: CaseLedger,
        units: Arc<dyn UnitDirectory>,
        limits: LimitsConfig,
        config: ImportConfig,
    ) -> Self {
        let engine = ImportMappingEngine::new(&units.all_fields(), config.mapping_threshold);
        let sanitizer = ImportSanitizer::new(units, limits, config.date_formats.clone());
        Self {
            db,
            ledger,
            engine,
            sanitizer,
            config,
        }
    }

    pub fn mapping_engine(&self) -> &ImportMappingEngine {
        &self.engine
    }

    /// Parses an upload and stores it with a proposed mapping.
    pub fn stage(&self, actor: &Actor, bytes: &[u8]) -> Result<ImportStagingBatch> {
        let _span = info_span!("import.stage", actor = %actor.id, bytes = bytes.len()).entered();

        if !self.ledger.permissions().can_create_anywhere(actor) {
            return Err(CaseflowError::PermissionDenied {
                actor: actor.id.clone(),
                action: Action::Create,
                unit: actor.home_unit.clone(),
            });
        }

        let sheet = read_spreadsheet(bytes, &self.config)?;
        let proposal = self.engine.propose_mapping(&sheet.headers);
        let now = crate::ledger::now();
        let batch = ImportStagingBatch {
            id: Uuid::new_v4().to_string(),
            created_by: actor.id.clone(),
            status: BatchStatus::PendingMapping,
            headers: sheet.headers,
            rows: sheet.rows,
            proposal,
            confirmed_mapping: None,
            records: Vec::new(),
            groups: Vec::new(),
            created_at: now,
            updated_at: now,
            committed_at: None,
        };

        let row = encode(&batch)?;
        self.db
            .with_conn(|conn| batch_repo::insert(conn, &row).map_err(CaseflowError::from))?;

        info!(
            batch_id = %batch.id,
            rows = batch.rows.len(),
            mapped = batch.proposal.mapping.len(),
            "Import staged"
        );
        Ok(batch)
    }

    /// Fixes the column mapping and sanitizes the rows with it.
    ///
    /// May be repeated until the batch is committed.
    pub fn confirm_mapping(
        &self,
        actor: &Actor,
        batch_id: &str,
        mapping: ColumnMapping,
    ) -> Result<ImportStagingBatch> {
        let _span = info_span!("import.confirm_mapping", batch_id, actor = %actor.id).entered();

        let mut batch = self.load_owned(actor, batch_id)?;
        let expected = batch.status;
        if !matches!(
            expected,
            BatchStatus::PendingMapping | BatchStatus::PendingConfirmation
        ) {
            return Err(CaseflowError::InvalidState(format!(
                "batch '{}' is {}",
                batch.id, expected
            )));
        }
        self.check_mapping(&batch, &mapping)?;

        let outcome = self.sanitizer.sanitize(&batch.rows, &mapping);
        batch.records = outcome.records;
        batch.groups = outcome.groups;
        batch.confirmed_mapping = Some(mapping);
        batch.status = BatchStatus::PendingConfirmation;
        batch.updated_at = crate::ledger::now();

        self.db.with_conn(|conn| save(conn, &batch, expected))?;

        let summary = batch.summary();
        info!(
            batch_id = %batch.id,
            ok = summary.ok,
            warnings = summary.warnings,
            rejected = summary.rejected,
            groups = summary.groups,
            "Import mapping confirmed"
        );
        Ok(batch)
    }

    /// Writes every accepted group to the ledger, or nothing.
    ///
    /// A group failure is not an error: the report comes back with
    /// `committed: false`, the failing rows carry the reason and the batch
    /// stays pending confirmation.
    pub fn commit(&self, actor: &Actor, batch_id: &str) -> Result<CommitReport> {
        let _span = info_span!("import.commit", batch_id, actor = %actor.id).entered();

        let mut batch = self.load_owned(actor, batch_id)?;
        if batch.status != BatchStatus::PendingConfirmation {
            return Err(CaseflowError::InvalidState(format!(
                "batch '{}' is {} and cannot be committed",
                batch.id, batch.status
            )));
        }

        for record in &mut batch.records {
            record.commit = None;
        }
        let accepted = self.select_groups(&mut batch);
        let attempted: BTreeSet<String> = accepted.iter().map(|g| g.case_id.clone()).collect();
        let now = crate::ledger::now();

        let application = self
            .ledger
            .apply_import_with(actor, &accepted, |conn, outcomes| {
                annotate_committed(&mut batch.records, outcomes);
                batch.status = BatchStatus::Committed;
                batch.updated_at = now;
                batch.committed_at = Some(now);
                save(conn, &batch, BatchStatus::PendingConfirmation)
            })?;

        let committed = match application {
            ImportApplication::Applied(outcomes) => {
                info!(batch_id = %batch.id, groups = outcomes.len(), "Import committed");
                true
            }
            ImportApplication::RolledBack(failures) => {
                let by_row: HashMap<usize, String> = failures
                    .iter()
                    .flat_map(|failure| {
                        failure.rows.iter().map(move |row| {
                            let reason = match failure.row {
                                Some(failed) if failed != *row => format!(
                                    "not committed because row {} of case '{}' failed: {}",
                                    failed, failure.case_id, failure.reason
                                ),
                                _ => failure.reason.clone(),
                            };
                            (*row, reason)
                        })
                    })
                    .collect();
                for record in &mut batch.records {
                    let reason = match by_row.get(&record.row_index) {
                        Some(reason) => reason.clone(),
                        None if record.group.as_ref().is_some_and(|g| attempted.contains(g)) => {
                            "not committed because other cases in the batch failed".to_string()
                        }
                        None => continue,
                    };
                    record.commit = Some(CommitAnnotation::Failed { reason });
                }
                batch.updated_at = now;
                self.db
                    .with_conn(|conn| save(conn, &batch, BatchStatus::PendingConfirmation))?;
                warn!(
                    batch_id = %batch.id,
                    failed_groups = failures.len(),
                    "Import commit rolled back"
                );
                false
            }
        };

        Ok(CommitReport {
            batch_id: batch.id.clone(),
            committed,
            rows: batch.records.iter().map(RowReport::from).collect(),
            summary: batch.summary(),
        })
    }

    /// Abandons a batch. Discarding twice is fine; a committed batch stays.
    pub fn discard(&self, actor: &Actor, batch_id: &str) -> Result<()> {
        let _span = info_span!("import.discard", batch_id, actor = %actor.id).entered();

        let mut batch = self.load_owned(actor, batch_id)?;
        match batch.status {
            BatchStatus::Discarded => return Ok(()),
            BatchStatus::Committed => {
                return Err(CaseflowError::InvalidState(format!(
                    "batch '{}' is already committed",
                    batch.id
                )))
            }
            BatchStatus::PendingMapping | BatchStatus::PendingConfirmation => {}
        }

        let expected = batch.status;
        batch.status = BatchStatus::Discarded;
        batch.updated_at = crate::ledger::now();
        self.db.with_conn(|conn| save(conn, &batch, expected))?;
        info!(batch_id = %batch.id, "Import discarded");
        Ok(())
    }

    pub fn get(&self, actor: &Actor, batch_id: &str) -> Result<ImportStagingBatch> {
        self.load_owned(actor, batch_id)
    }

    /// The actor's batches, newest first.
    pub fn list_for(&self, actor: &Actor) -> Result<Vec<ImportStagingBatch>> {
        let rows = self
            .db
            .with_conn(|conn| batch_repo::list_by_creator(conn, &actor.id).map_err(CaseflowError::from))?;
        rows.iter().map(decode).collect()
    }

    fn load_owned(&self, actor: &Actor, batch_id: &str) -> Result<ImportStagingBatch> {
        let row = self
            .db
            .with_conn(|conn| batch_repo::find(conn, batch_id).map_err(CaseflowError::from))?
            .ok_or_else(|| CaseflowError::batch_not_found(batch_id))?;
        if row.created_by != actor.id {
            return Err(CaseflowError::PermissionDenied {
                actor: actor.id.clone(),
                action: Action::Create,
                unit: actor.home_unit.clone(),
            });
        }
        decode(&row)
    }

    fn check_mapping(&self, batch: &ImportStagingBatch, mapping: &ColumnMapping) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (column, field) in mapping.iter() {
            if column >= batch.headers.len() {
                return Err(CaseflowError::validation(
                    "mapping",
                    format!(
                        "column {} does not exist; the sheet has {} columns",
                        column,
                        batch.headers.len()
                    ),
                ));
            }
            if !self.engine.fields().contains(field) {
                return Err(CaseflowError::validation(
                    "mapping",
                    format!("unknown field '{}'", field),
                ));
            }
            if !seen.insert(field) {
                return Err(CaseflowError::validation(
                    "mapping",
                    format!("field '{}' is mapped more than once", field),
                ));
            }
        }
        for required in [CaseField::CaseIdentifier, CaseField::Unit] {
            if !seen.contains(&required) {
                return Err(CaseflowError::validation(
                    "mapping",
                    format!("field '{}' must be mapped", required),
                ));
            }
        }
        Ok(())
    }

    /// Groups that will be applied; others are marked skipped.
    fn select_groups(&self, batch: &mut ImportStagingBatch) -> Vec<GroupPlan> {
        if self.config.accept_warnings {
            return batch.groups.clone();
        }
        let warned: BTreeSet<String> = batch
            .records
            .iter()
            .filter(|r| r.outcome == RecordOutcome::Warning)
            .filter_map(|r| r.group.clone())
            .collect();
        for record in &mut batch.records {
            if record.group.as_ref().is_some_and(|g| warned.contains(g)) {
                record.commit = Some(CommitAnnotation::Skipped {
                    reason: "case has rows with warnings and warnings are not accepted".to_string(),
                });
            }
        }
        batch
            .groups
            .iter()
            .filter(|g| !warned.contains(&g.case_id))
            .cloned()
            .collect()
    }
}

fn annotate_committed(records: &mut [StagingRecord], outcomes: &[GroupOutcome]) {
    let by_case: HashMap<&str, &GroupOutcome> =
        outcomes.iter().map(|o| (o.case_id.as_str(), o)).collect();
    for record in records.iter_mut() {
        let Some(outcome) = record.group.as_deref().and_then(|g| by_case.get(g)) else {
            continue;
        };
        record.commit = Some(CommitAnnotation::Committed {
            case_id: outcome.case_id.clone(),
            sequences: outcome
                .row_sequences
                .get(&record.row_index)
                .cloned()
                .unwrap_or_default(),
        });
    }
}

fn encode(batch: &ImportStagingBatch) -> Result<BatchRow> {
    let body = serde_json::to_string(batch).map_err(|source| DatabaseError::Json {
        column: "import_batches.body",
        source,
    })?;
    Ok(BatchRow {
        id: batch.id.clone(),
        created_by: batch.created_by.clone(),
        status: batch.status.as_str().to_string(),
        body,
        created_at: timestamp(&batch.created_at),
        updated_at: timestamp(&batch.updated_at),
        committed_at: batch.committed_at.as_ref().map(timestamp),
    })
}

fn decode(row: &BatchRow) -> Result<ImportStagingBatch> {
    let batch: ImportStagingBatch =
        serde_json::from_str(&row.body).map_err(|source| DatabaseError::Json {
            column: "import_batches.body",
            source,
        })?;
    if BatchStatus::parse(&row.status) != Some(batch.status) {
        return Err(DatabaseError::UnknownValue {
            column: "import_batches.status",
            value: row.status.clone(),
        }
        .into());
    }
    Ok(batch)
}

/// Writes the batch if nobody changed its status since it was loaded.
fn save(conn: &Connection, batch: &ImportStagingBatch, expected: BatchStatus) -> Result<()> {
    let row = encode(batch)?;
    if !batch_repo::update(conn, &row, expected.as_str())? {
        return Err(CaseflowError::InvalidState(format!(
            "batch '{}' changed concurrently; reload it",
            batch.id
        )));
    }
    Ok(())
}
