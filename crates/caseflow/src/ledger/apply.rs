//! Applying sanitized import groups to the ledger in one transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use super::{busy_as_conflict, now, rules, CaseLedger};
use crate::broadcast::LifecycleEvent;
use crate::db::{case_repo, movement_repo};
use crate::error::{CaseflowError, Result};
use crate::import::model::{GroupPlan, PlannedStep};
use crate::model::{Case, CaseStatus, Effect, Movement};
use crate::permission::{Action, Actor};

/// What one group wrote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupOutcome {
    pub case_id: String,
    /// Whether the case did not exist before the import.
    pub created: bool,
    pub movements: Vec<Movement>,
    /// Source row → sequences of the movements it produced.
    pub row_sequences: BTreeMap<usize, Vec<u32>>,
}

/// Why a group could not be applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupFailure {
    pub case_id: String,
    pub rows: Vec<usize>,
    /// Row whose step failed, when the failure belongs to one row.
    pub row: Option<usize>,
    pub reason: String,
}

/// Result of [`CaseLedger::apply_import`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportApplication {
    /// Every group was written and committed.
    Applied(Vec<GroupOutcome>),
    /// At least one group failed; nothing was written.
    RolledBack(Vec<GroupFailure>),
}

struct StepError {
    row: Option<usize>,
    error: CaseflowError,
}

impl StepError {
    fn at(step: &PlannedStep) -> impl FnOnce(CaseflowError) -> StepError + '_ {
        move |error| StepError {
            row: step.rows.first().copied(),
            error,
        }
    }

    fn group<E: Into<CaseflowError>>(error: E) -> StepError {
        StepError {
            row: None,
            error: error.into(),
        }
    }
}

/// Case state carried through the steps of one group.
struct Replay {
    case: Case,
    history: Vec<Movement>,
    written: Vec<Movement>,
}

impl CaseLedger {
    /// Applies every group in a single transaction.
    ///
    /// Groups are independent, so all of them are attempted and every
    /// failure is collected. If any group fails the transaction is rolled
    /// back. Storage errors abort immediately with `Err`. Extra field values
    /// in the plans must already be normalized.
    pub fn apply_import(&self, actor: &Actor, groups: &[GroupPlan]) -> Result<ImportApplication> {
        self.apply_import_with(actor, groups, |_, _| Ok(()))
    }

    /// Like [`apply_import`](Self::apply_import), running `finish` inside the
    /// same transaction once every group succeeded. An error from `finish`
    /// rolls everything back and is returned as is.
    pub fn apply_import_with<F>(
        &self,
        actor: &Actor,
        groups: &[GroupPlan],
        finish: F,
    ) -> Result<ImportApplication>
    where
        F: FnOnce(&Connection, &[GroupOutcome]) -> Result<()>,
    {
        let _span =
            info_span!("ledger.apply_import", actor = %actor.id, groups = groups.len()).entered();
        let started = now();

        let application = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut outcomes = Vec::with_capacity(groups.len());
            let mut failures = Vec::new();

            for plan in groups {
                match self.apply_group(&tx, actor, plan, started) {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(StepError {
                        error: CaseflowError::Database(e),
                        ..
                    }) => {
                        return Err(busy_as_conflict(CaseflowError::Database(e), &plan.case_id));
                    }
                    Err(StepError { row, error }) => {
                        warn!(case_id = %plan.case_id, ?row, "Import group rejected: {}", error);
                        failures.push(GroupFailure {
                            case_id: plan.case_id.clone(),
                            rows: plan.rows(),
                            row,
                            reason: error.to_string(),
                        });
                    }
                }
            }

            if failures.is_empty() {
                finish(&*tx, outcomes.as_slice())?;
                tx.commit()?;
                Ok(ImportApplication::Applied(outcomes))
            } else {
                tx.rollback()?;
                Ok(ImportApplication::RolledBack(failures))
            }
        })?;

        match &application {
            ImportApplication::Applied(outcomes) => {
                let written: usize = outcomes.iter().map(|o| o.movements.len()).sum();
                info!(groups = outcomes.len(), movements = written, "Import applied");
                for movement in outcomes.iter().flat_map(|o| o.movements.iter()) {
                    self.sink.emit(LifecycleEvent::from(movement));
                }
            }
            ImportApplication::RolledBack(failures) => {
                warn!(failed_groups = failures.len(), "Import rolled back");
            }
        }
        Ok(application)
    }

    fn apply_group(
        &self,
        conn: &Connection,
        actor: &Actor,
        plan: &GroupPlan,
        started: DateTime<Utc>,
    ) -> std::result::Result<GroupOutcome, StepError> {
        let mut steps = plan.steps.iter();
        let mut row_sequences: BTreeMap<usize, Vec<u32>> = BTreeMap::new();

        let existing = case_repo::find(conn, &plan.case_id).map_err(StepError::group)?;
        let created = existing.is_none();

        let mut replay = match existing {
            Some(case) => {
                let history = movement_repo::list(conn, &case.id).map_err(StepError::group)?;
                Replay {
                    case,
                    history,
                    written: Vec::new(),
                }
            }
            None => {
                let first = steps.next().ok_or_else(|| {
                    StepError::group(CaseflowError::validation("rows", "group has no rows"))
                })?;
                let mut replay = self
                    .import_create(conn, actor, plan, first, started)
                    .map_err(StepError::at(first))?;
                self.apply_step(conn, actor, &mut replay, first, started)
                    .map_err(StepError::at(first))?;
                record_rows(&mut row_sequences, first, &replay.written);
                replay
            }
        };

        for step in steps {
            let before = replay.written.len();
            self.apply_step(conn, actor, &mut replay, step, started)
                .map_err(StepError::at(step))?;
            record_rows(&mut row_sequences, step, &replay.written[before..]);
        }

        if !created {
            let title = plan.title.clone().unwrap_or_else(|| replay.case.title.clone());
            let mut extra_fields = replay.case.extra_fields.clone();
            extra_fields.extend(plan.extra_fields.clone());
            let updated = case_repo::update_details(
                conn,
                &replay.case.id,
                replay.case.version,
                &title,
                &extra_fields,
                &started,
            )
            .map_err(StepError::group)?;
            if !updated {
                return Err(StepError::group(CaseflowError::Conflict {
                    case_id: replay.case.id.clone(),
                }));
            }
        }

        Ok(GroupOutcome {
            case_id: plan.case_id.clone(),
            created,
            movements: replay.written,
            row_sequences,
        })
    }

    /// Inserts a new case and its creating movement for the group's first step.
    fn import_create(
        &self,
        conn: &Connection,
        actor: &Actor,
        plan: &GroupPlan,
        first: &PlannedStep,
        started: DateTime<Utc>,
    ) -> Result<Replay> {
        let unit = self.check_unit(&first.unit)?;
        self.permissions.require(actor, Action::Create, &unit, None)?;
        match first.effect {
            Some(Effect::Return) => {
                return Err(CaseflowError::validation(
                    "status_effect",
                    format!("case '{}' does not exist and cannot be returned", plan.case_id),
                ))
            }
            Some(Effect::Reopen) => {
                return Err(CaseflowError::InvalidState(format!(
                    "case '{}' does not exist and cannot be reopened",
                    plan.case_id
                )))
            }
            _ => {}
        }

        let title = self.check_title(plan.title.as_deref().unwrap_or(plan.case_id.as_str()))?;
        if let Some(missing) = self
            .units
            .field_definitions(&unit)
            .into_iter()
            .find(|d| d.required && !plan.extra_fields.contains_key(&d.name))
        {
            return Err(CaseflowError::validation(
                missing.name,
                format!("required by unit '{}'", unit),
            ));
        }

        let case = Case {
            id: plan.case_id.clone(),
            title,
            current_unit: unit.clone(),
            status: CaseStatus::Active,
            extra_fields: plan.extra_fields.clone(),
            version: 0,
            last_sequence: 0,
            created_at: started,
            updated_at: started,
        };
        let movement = Movement {
            case_id: plan.case_id.clone(),
            sequence: 0,
            from_unit: None,
            to_unit: unit,
            effect: Effect::Create,
            actor_id: actor.id.clone(),
            occurred_at: first.occurred_at.unwrap_or(started),
            note: first.note.clone(),
        };
        case_repo::insert(conn, &case)?;
        movement_repo::insert(conn, &movement)?;

        Ok(Replay {
            case,
            history: vec![movement.clone()],
            written: vec![movement],
        })
    }

    /// Brings the case to the state a step describes.
    ///
    /// A step whose unit differs from where its effect lands is completed
    /// with a transfer: before a finalize, after a reopen.
    fn apply_step(
        &self,
        conn: &Connection,
        actor: &Actor,
        replay: &mut Replay,
        step: &PlannedStep,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let unit = self.check_unit(&step.unit)?;
        let at = step.occurred_at.unwrap_or(started);

        match step.effect {
            None | Some(Effect::Create) | Some(Effect::Transfer) => {
                self.import_transfer(conn, actor, replay, &unit, step, at)?;
            }
            Some(Effect::Finalize) => {
                self.import_transfer(conn, actor, replay, &unit, step, at)?;
                let case = &replay.case;
                self.permissions
                    .require(actor, Action::Finalize, &case.current_unit, Some(case))?;
                rules::check_finalize(case)?;
                let target = case.current_unit.clone();
                self.record(conn, actor, replay, Effect::Finalize, &target, step, at)?;
            }
            Some(Effect::Return) => {
                let case = &replay.case;
                self.permissions
                    .require(actor, Action::Return, &unit, Some(case))?;
                let target = rules::return_destination(case, &replay.history, Some(&unit))?;
                self.record(conn, actor, replay, Effect::Return, &target, step, at)?;
            }
            Some(Effect::Reopen) => {
                let case = &replay.case;
                self.permissions
                    .require(actor, Action::Reopen, &case.current_unit, Some(case))?;
                let target = rules::reopen_destination(case, &replay.history)?;
                self.record(conn, actor, replay, Effect::Reopen, &target, step, at)?;
                self.import_transfer(conn, actor, replay, &unit, step, at)?;
            }
        }
        Ok(())
    }

    /// Transfers to `unit` unless the case is already there.
    fn import_transfer(
        &self,
        conn: &Connection,
        actor: &Actor,
        replay: &mut Replay,
        unit: &str,
        step: &PlannedStep,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if replay.case.current_unit == unit {
            return Ok(());
        }
        self.permissions
            .require(actor, Action::Transfer, unit, Some(&replay.case))?;
        rules::check_transfer(&replay.case, unit)?;
        self.record(conn, actor, replay, Effect::Transfer, unit, step, at)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        conn: &Connection,
        actor: &Actor,
        replay: &mut Replay,
        effect: Effect,
        to_unit: &str,
        step: &PlannedStep,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let movement =
            rules::next_movement(&replay.case, &actor.id, effect, to_unit, step.note.clone(), at);
        movement_repo::insert(conn, &movement)?;
        rules::advance(&mut replay.case, &movement);
        replay.history.push(movement.clone());
        replay.written.push(movement);
        Ok(())
    }
}

fn record_rows(row_sequences: &mut BTreeMap<usize, Vec<u32>>, step: &PlannedStep, written: &[Movement]) {
    for row in &step.rows {
        row_sequences
            .entry(*row)
            .or_default()
            .extend(written.iter().map(|m| m.sequence));
    }
}
