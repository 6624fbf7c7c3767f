//! The case ledger: cases, their movement history and the state machine
//! that extends it.
//!
//! Every mutation is a single SQLite transaction that checks the caller's
//! snapshot `version` before writing. Lifecycle events go out only after
//! the transaction has committed.

mod apply;
pub(crate) mod rules;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::{debug, info, info_span};

use crate::broadcast::{LifecycleEvent, LifecycleSink};
use crate::config::LimitsConfig;
use crate::db::{case_repo, movement_repo, Database};
use crate::error::{CaseflowError, Result};
use crate::model::{Case, CaseEdit, CaseStatus, Effect, Movement, NewCase};
use crate::normalize::{canonical_case_id, collapse_whitespace};
use crate::permission::{Action, Actor, PermissionEvaluator};
use crate::units::{validate_fields, UnitDirectory};

pub use crate::db::case_repo::CaseFilter;
pub use apply::{GroupFailure, GroupOutcome, ImportApplication};

/// Owns cases and their movement history.
#[derive(Clone)]
pub struct CaseLedger {
    db: Database,
    units: Arc<dyn UnitDirectory>,
    sink: Arc<dyn LifecycleSink>,
    permissions: PermissionEvaluator,
    limits: LimitsConfig,
    date_formats: Vec<String>,
}

impl CaseLedger {
    pub fn new(
        db: Database,
        units: Arc<dyn UnitDirectory>,
        sink: Arc<dyn LifecycleSink>,
        limits: LimitsConfig,
        date_formats: Vec<String>,
    ) -> Self {
        Self {
            db,
            units,
            sink,
            permissions: PermissionEvaluator,
            limits,
            date_formats,
        }
    }

    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    /// Creates a case in `initial_unit` with its creating movement.
    pub fn create_case(&self, actor: &Actor, initial_unit: &str, new: NewCase) -> Result<Case> {
        let _span = info_span!("ledger.create_case", actor = %actor.id).entered();

        let unit = self.check_unit(initial_unit)?;
        self.permissions.require(actor, Action::Create, &unit, None)?;

        let id = self.check_identifier(&new.identifier)?;
        let title = self.check_title(&new.title)?;
        let note = self.check_note(new.note.as_deref())?;
        let extra_fields = validate_fields(
            &self.units.field_definitions(&unit),
            &new.extra_fields,
            &self.date_formats,
            self.limits.field_max_len,
            true,
        )
        .map_err(|(field, reason)| CaseflowError::validation(field, reason))?;

        let now = now();
        let occurred_at = new.occurred_at.map(|t| t.trunc_subsecs(6)).unwrap_or(now);
        let case = Case {
            id: id.clone(),
            title,
            current_unit: unit.clone(),
            status: CaseStatus::Active,
            extra_fields,
            version: 0,
            last_sequence: 0,
            created_at: now,
            updated_at: now,
        };
        let movement = Movement {
            case_id: id.clone(),
            sequence: 0,
            from_unit: None,
            to_unit: unit,
            effect: Effect::Create,
            actor_id: actor.id.clone(),
            occurred_at,
            note,
        };

        self.db
            .with_transaction(|tx| {
                if case_repo::exists(tx, &id)? {
                    return Err(CaseflowError::validation(
                        "identifier",
                        format!("case '{}' already exists", id),
                    ));
                }
                case_repo::insert(tx, &case)?;
                movement_repo::insert(tx, &movement)?;
                Ok(())
            })
            .map_err(|e| busy_as_conflict(e, &id))?;

        info!(case_id = %case.id, unit = %case.current_unit, "Case created");
        self.sink.emit(LifecycleEvent::from(&movement));
        Ok(case)
    }

    /// Moves an active or returned case to another unit.
    pub fn transfer(
        &self,
        actor: &Actor,
        case: &Case,
        destination: &str,
        note: Option<&str>,
    ) -> Result<Movement> {
        let _span = info_span!("ledger.transfer", case_id = %case.id, actor = %actor.id).entered();

        let destination = self.check_unit(destination)?;
        self.permissions
            .require(actor, Action::Transfer, &destination, Some(case))?;
        rules::check_transfer(case, &destination)?;
        let note = self.check_note(note)?;

        self.append(case, |_| {
            Ok(rules::next_movement(
                case,
                &actor.id,
                Effect::Transfer,
                &destination,
                note,
                now(),
            ))
        })
    }

    /// Closes a case in its current unit.
    pub fn finalize(&self, actor: &Actor, case: &Case, note: Option<&str>) -> Result<Movement> {
        let _span = info_span!("ledger.finalize", case_id = %case.id, actor = %actor.id).entered();

        self.permissions
            .require(actor, Action::Finalize, &case.current_unit, Some(case))?;
        rules::check_finalize(case)?;
        let note = self.check_note(note)?;

        self.append(case, |_| {
            Ok(rules::next_movement(
                case,
                &actor.id,
                Effect::Finalize,
                &case.current_unit,
                note,
                now(),
            ))
        })
    }

    /// Sends a case back to the unit it came from.
    ///
    /// `destination` may be omitted; when given it must name that unit.
    pub fn return_case(
        &self,
        actor: &Actor,
        case: &Case,
        destination: Option<&str>,
        note: Option<&str>,
    ) -> Result<Movement> {
        let _span = info_span!("ledger.return", case_id = %case.id, actor = %actor.id).entered();

        let requested = destination.map(collapse_whitespace);
        let permission_unit = requested.as_deref().unwrap_or(case.current_unit.as_str());
        self.permissions
            .require(actor, Action::Return, permission_unit, Some(case))?;
        if case.is_finalized() {
            return Err(CaseflowError::InvalidState(format!(
                "case '{}' is finalized; only reopen is allowed",
                case.id
            )));
        }
        let note = self.check_note(note)?;

        self.append(case, |conn| {
            let history = movement_repo::list(conn, &case.id)?;
            let target = rules::return_destination(case, &history, requested.as_deref())?;
            if requested.is_none() {
                self.permissions
                    .require(actor, Action::Return, &target, Some(case))?;
            }
            Ok(rules::next_movement(
                case,
                &actor.id,
                Effect::Return,
                &target,
                note,
                now(),
            ))
        })
    }

    /// Reopens a finalized case in the unit it was finalized from.
    pub fn reopen(&self, actor: &Actor, case: &Case, note: Option<&str>) -> Result<Movement> {
        let _span = info_span!("ledger.reopen", case_id = %case.id, actor = %actor.id).entered();

        self.permissions
            .require(actor, Action::Reopen, &case.current_unit, Some(case))?;
        let note = self.check_note(note)?;

        self.append(case, |conn| {
            let history = movement_repo::list(conn, &case.id)?;
            let target = rules::reopen_destination(case, &history)?;
            Ok(rules::next_movement(
                case,
                &actor.id,
                Effect::Reopen,
                &target,
                note,
                now(),
            ))
        })
    }

    /// Movement history ordered by sequence.
    ///
    /// With an actor, view-history rights on the case's current unit are
    /// required.
    pub fn history(&self, actor: Option<&Actor>, case_id: &str) -> Result<Vec<Movement>> {
        let case = self.get(case_id)?;
        if let Some(actor) = actor {
            self.permissions
                .require(actor, Action::ViewHistory, &case.current_unit, Some(&case))?;
        }
        self.db
            .with_conn(|conn| movement_repo::list(conn, &case.id).map_err(CaseflowError::from))
    }

    /// Loads a case, failing with `NotFound`.
    pub fn get(&self, case_id: &str) -> Result<Case> {
        self.find(case_id)?
            .ok_or_else(|| CaseflowError::case_not_found(case_id))
    }

    /// Loads a case by any spelling of its identifier.
    pub fn find(&self, case_id: &str) -> Result<Option<Case>> {
        let Some(id) = canonical_case_id(case_id) else {
            return Ok(None);
        };
        self.db
            .with_conn(|conn| case_repo::find(conn, &id).map_err(CaseflowError::from))
    }

    pub fn list(&self, filter: &CaseFilter) -> Result<(Vec<Case>, u64)> {
        self.db
            .with_conn(|conn| case_repo::query(conn, filter).map_err(CaseflowError::from))
    }

    /// Updates title and extra fields without recording a movement.
    ///
    /// Extra field values are merged into the existing ones and validated
    /// against the current unit. A blank value clears an optional field.
    pub fn edit(&self, actor: &Actor, case: &Case, edit: CaseEdit) -> Result<Case> {
        let _span = info_span!("ledger.edit", case_id = %case.id, actor = %actor.id).entered();

        self.permissions
            .require(actor, Action::Edit, &case.current_unit, Some(case))?;
        if case.is_finalized() {
            return Err(CaseflowError::InvalidState(format!(
                "case '{}' is finalized and cannot be edited",
                case.id
            )));
        }

        let title = match edit.title.as_deref() {
            Some(raw) => self.check_title(raw)?,
            None => case.title.clone(),
        };

        let definitions = self.units.field_definitions(&case.current_unit);
        let normalized = validate_fields(
            &definitions,
            &edit.extra_fields,
            &self.date_formats,
            self.limits.field_max_len,
            false,
        )
        .map_err(|(field, reason)| CaseflowError::validation(field, reason))?;

        let mut extra_fields = case.extra_fields.clone();
        for (name, raw) in &edit.extra_fields {
            if raw.trim().is_empty() {
                if definitions.iter().any(|d| &d.name == name && d.required) {
                    return Err(CaseflowError::validation(
                        name.as_str(),
                        "required field cannot be cleared",
                    ));
                }
                extra_fields.remove(name);
            }
        }
        extra_fields.extend(normalized);

        let now = now();
        self.db
            .with_transaction(|tx| {
                if !case_repo::update_details(tx, &case.id, case.version, &title, &extra_fields, &now)?
                {
                    return Err(lost_race(tx, &case.id)?);
                }
                Ok(())
            })
            .map_err(|e| busy_as_conflict(e, &case.id))?;

        debug!(case_id = %case.id, "Case details updated");
        Ok(Case {
            title,
            extra_fields,
            version: case.version + 1,
            updated_at: now,
            ..case.clone()
        })
    }

    /// Removes a case and its whole history.
    pub fn delete(&self, actor: &Actor, case: &Case) -> Result<()> {
        let _span = info_span!("ledger.delete", case_id = %case.id, actor = %actor.id).entered();

        self.permissions
            .require(actor, Action::Delete, &case.current_unit, Some(case))?;
        self.db
            .with_transaction(|tx| {
                if !case_repo::delete(tx, &case.id, case.version)? {
                    return Err(lost_race(tx, &case.id)?);
                }
                Ok(())
            })
            .map_err(|e| busy_as_conflict(e, &case.id))?;

        info!(case_id = %case.id, "Case deleted");
        Ok(())
    }

    /// Runs one movement-appending transaction against a snapshot.
    ///
    /// `build` runs after the version check, so the stored history it reads
    /// matches `case`.
    fn append<F>(&self, case: &Case, build: F) -> Result<Movement>
    where
        F: FnOnce(&Connection) -> Result<Movement>,
    {
        let now = now();
        let movement = self
            .db
            .with_transaction(|tx| {
                if !case_repo::bump_version(tx, &case.id, case.version, &now)? {
                    return Err(lost_race(tx, &case.id)?);
                }
                let movement = build(tx)?;
                movement_repo::insert(tx, &movement)?;
                Ok(movement)
            })
            .map_err(|e| busy_as_conflict(e, &case.id))?;

        info!(
            case_id = %movement.case_id,
            sequence = movement.sequence,
            effect = %movement.effect,
            to_unit = %movement.to_unit,
            "Movement recorded"
        );
        self.sink.emit(LifecycleEvent::from(&movement));
        Ok(movement)
    }

    fn check_unit(&self, raw: &str) -> Result<String> {
        let unit = collapse_whitespace(raw);
        if unit.is_empty() {
            return Err(CaseflowError::validation("unit", "must not be empty"));
        }
        if unit.chars().count() > self.limits.unit_max_len {
            return Err(CaseflowError::validation(
                "unit",
                format!("longer than {} characters", self.limits.unit_max_len),
            ));
        }
        if !self.units.is_known(&unit) {
            return Err(CaseflowError::validation(
                "unit",
                format!("unknown unit '{}'", unit),
            ));
        }
        Ok(unit)
    }

    fn check_identifier(&self, raw: &str) -> Result<String> {
        let id = canonical_case_id(raw)
            .ok_or_else(|| CaseflowError::validation("identifier", "must not be empty"))?;
        if id.chars().count() > self.limits.identifier_max_len {
            return Err(CaseflowError::validation(
                "identifier",
                format!("longer than {} characters", self.limits.identifier_max_len),
            ));
        }
        Ok(id)
    }

    fn check_title(&self, raw: &str) -> Result<String> {
        let title = collapse_whitespace(raw);
        if title.is_empty() {
            return Err(CaseflowError::validation("title", "must not be empty"));
        }
        if title.chars().count() > self.limits.title_max_len {
            return Err(CaseflowError::validation(
                "title",
                format!("longer than {} characters", self.limits.title_max_len),
            ));
        }
        Ok(title)
    }

    fn check_note(&self, raw: Option<&str>) -> Result<Option<String>> {
        let Some(note) = raw.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        if note.chars().count() > self.limits.note_max_len {
            return Err(CaseflowError::validation(
                "note",
                format!("longer than {} characters", self.limits.note_max_len),
            ));
        }
        Ok(Some(note.to_string()))
    }
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Error for a version check that matched no row.
fn lost_race(conn: &Connection, case_id: &str) -> Result<CaseflowError> {
    if case_repo::exists(conn, case_id)? {
        Ok(CaseflowError::Conflict {
            case_id: case_id.to_string(),
        })
    } else {
        Ok(CaseflowError::case_not_found(case_id))
    }
}

/// SQLite lock contention from another connection is a lost race too.
fn busy_as_conflict(err: CaseflowError, case_id: &str) -> CaseflowError {
    match err {
        CaseflowError::Database(ref db) if db.is_busy() => CaseflowError::Conflict {
            case_id: case_id.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{LifecycleKind, RecordingSink};
    use crate::permission::Role;
    use crate::units::{FieldDefinition, FieldType, StaticUnitDirectory, UnitConfig};

    struct Fixture {
        ledger: CaseLedger,
        sink: RecordingSink,
        admin: Actor,
    }

    fn fixture() -> Fixture {
        let units = StaticUnitDirectory::new(vec![
            UnitConfig {
                name: "Protocol".to_string(),
                fields: vec![],
            },
            UnitConfig {
                name: "Legal".to_string(),
                fields: vec![
                    FieldDefinition::new("opinion_date", FieldType::Date, false),
                    FieldDefinition::new(
                        "priority",
                        FieldType::Choice {
                            options: vec!["Low".to_string(), "Urgent".to_string()],
                        },
                        true,
                    ),
                ],
            },
            UnitConfig {
                name: "Finance".to_string(),
                fields: vec![],
            },
        ]);
        let sink = RecordingSink::new();
        let ledger = CaseLedger::new(
            Database::open_in_memory().unwrap(),
            Arc::new(units),
            Arc::new(sink.clone()),
            LimitsConfig::default(),
            crate::dates::DEFAULT_DATE_FORMATS
                .iter()
                .map(|f| f.to_string())
                .collect(),
        );
        Fixture {
            ledger,
            sink,
            admin: Actor::new("admin", Role::Administrator, "Protocol"),
        }
    }

    #[test]
    fn test_create_canonicalizes_identifier() {
        let f = fixture();
        let case = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new(" 2024-001 ", "Permit"))
            .unwrap();
        assert_eq!(case.id, "2024/001");
        assert_eq!(f.ledger.get("2024/001").unwrap(), case);
        assert_eq!(f.ledger.get("2024.001").unwrap().id, "2024/001");

        let history = f.ledger.history(None, "2024/001").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_unit, None);
        assert_eq!(history[0].effect, Effect::Create);
        assert_eq!(f.sink.events()[0].kind, LifecycleKind::Created);
    }

    #[test]
    fn test_create_rejects_duplicates_and_blanks() {
        let f = fixture();
        f.ledger
            .create_case(&f.admin, "Protocol", NewCase::new("2024/001", "Permit"))
            .unwrap();
        let dup = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new("2024-001", "Again"));
        assert!(matches!(dup, Err(CaseflowError::Validation { .. })));

        let blank_id = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new(" -/ ", "T"));
        assert!(matches!(blank_id, Err(CaseflowError::Validation { .. })));

        let blank_title = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new("2024/002", "  "));
        assert!(matches!(blank_title, Err(CaseflowError::Validation { .. })));

        let unknown_unit = f
            .ledger
            .create_case(&f.admin, "Nowhere", NewCase::new("2024/003", "T"));
        assert!(matches!(unknown_unit, Err(CaseflowError::Validation { .. })));
    }

    #[test]
    fn test_create_validates_extra_fields() {
        let f = fixture();
        let missing = f
            .ledger
            .create_case(&f.admin, "Legal", NewCase::new("L/1", "Opinion"));
        assert!(matches!(
            missing,
            Err(CaseflowError::Validation { ref field, .. }) if field == "priority"
        ));

        let case = f
            .ledger
            .create_case(
                &f.admin,
                "Legal",
                NewCase::new("L/1", "Opinion")
                    .with_field("priority", "urgent")
                    .with_field("opinion_date", "10/01/2024"),
            )
            .unwrap();
        assert_eq!(case.extra_fields["priority"], "Urgent");
        assert_eq!(case.extra_fields["opinion_date"], "2024-01-10");
    }

    #[test]
    fn test_stale_snapshot_conflicts() {
        let f = fixture();
        let case = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new("C/1", "T"))
            .unwrap();
        f.ledger.transfer(&f.admin, &case, "Legal", None).unwrap();
        let err = f
            .ledger
            .transfer(&f.admin, &case, "Finance", None)
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.ledger.history(None, "C/1").unwrap().len(), 2);
    }

    #[test]
    fn test_deleted_case_is_not_found() {
        let f = fixture();
        let case = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new("C/2", "T"))
            .unwrap();
        f.ledger.delete(&f.admin, &case).unwrap();
        assert!(f.ledger.find("C/2").unwrap().is_none());
        assert!(matches!(
            f.ledger.transfer(&f.admin, &case, "Legal", None),
            Err(CaseflowError::NotFound { .. })
        ));
    }

    #[test]
    fn test_edit_merges_and_bumps_version() {
        let f = fixture();
        let case = f
            .ledger
            .create_case(
                &f.admin,
                "Legal",
                NewCase::new("L/2", "Opinion").with_field("priority", "Low"),
            )
            .unwrap();
        let edited = f
            .ledger
            .edit(
                &f.admin,
                &case,
                CaseEdit {
                    title: Some("Opinion on zoning".to_string()),
                    extra_fields: [("opinion_date".to_string(), "2024-02-01".to_string())]
                        .into_iter()
                        .collect(),
                },
            )
            .unwrap();
        assert_eq!(edited.version, 1);
        assert_eq!(edited.extra_fields["priority"], "Low");
        assert_eq!(f.ledger.get("L/2").unwrap(), edited);
        assert_eq!(f.ledger.history(None, "L/2").unwrap().len(), 1);

        let cleared = f.ledger.edit(
            &f.admin,
            &edited,
            CaseEdit {
                title: None,
                extra_fields: [("priority".to_string(), "".to_string())]
                    .into_iter()
                    .collect(),
            },
        );
        assert!(matches!(cleared, Err(CaseflowError::Validation { .. })));
    }

    #[test]
    fn test_history_requires_view_rights_when_actor_given() {
        let f = fixture();
        f.ledger
            .create_case(&f.admin, "Protocol", NewCase::new("C/3", "T"))
            .unwrap();
        let outsider = Actor::new("v-1", Role::Viewer, "Finance");
        assert!(matches!(
            f.ledger.history(Some(&outsider), "C/3"),
            Err(CaseflowError::PermissionDenied { .. })
        ));
        let insider = Actor::new("v-2", Role::Viewer, "Protocol");
        assert_eq!(f.ledger.history(Some(&insider), "C/3").unwrap().len(), 1);
        assert!(matches!(
            f.ledger.history(None, "C/404"),
            Err(CaseflowError::NotFound { .. })
        ));
    }

    #[test]
    fn test_events_follow_commits_only() {
        let f = fixture();
        let case = f
            .ledger
            .create_case(&f.admin, "Protocol", NewCase::new("C/4", "T"))
            .unwrap();
        let _ = f.ledger.transfer(&f.admin, &case, "Protocol", None);
        let _ = f.ledger.reopen(&f.admin, &case, None);
        assert_eq!(f.sink.events().len(), 1);
    }
}
