//! Transition rules of the case state machine.
//!
//! Everything here works on an in-memory case and its history so the same
//! checks serve single operations and batch imports.

use chrono::{DateTime, Utc};

use crate::error::{CaseflowError, Result};
use crate::model::{Case, Effect, Movement};

fn finalized(case: &Case) -> CaseflowError {
    CaseflowError::InvalidState(format!(
        "case '{}' is finalized; only reopen is allowed",
        case.id
    ))
}

pub(crate) fn check_transfer(case: &Case, destination: &str) -> Result<()> {
    if case.is_finalized() {
        return Err(finalized(case));
    }
    if case.current_unit == destination {
        return Err(CaseflowError::validation(
            "destination",
            format!("case is already in '{}'", destination),
        ));
    }
    Ok(())
}

pub(crate) fn check_finalize(case: &Case) -> Result<()> {
    if case.is_finalized() {
        return Err(CaseflowError::InvalidState(format!(
            "case '{}' is already finalized",
            case.id
        )));
    }
    Ok(())
}

/// Unit a return sends the case back to: the most recent unit in the
/// history that differs from the current one.
///
/// A requested destination must be that unit.
pub(crate) fn return_destination(
    case: &Case,
    history: &[Movement],
    requested: Option<&str>,
) -> Result<String> {
    if case.is_finalized() {
        return Err(finalized(case));
    }

    let previous = history
        .iter()
        .rev()
        .map(|m| m.to_unit.as_str())
        .find(|unit| *unit != case.current_unit)
        .ok_or_else(|| {
            CaseflowError::validation(
                "destination",
                format!("case '{}' has no previous unit to return to", case.id),
            )
        })?;

    match requested {
        Some(unit) if unit != previous => Err(CaseflowError::validation(
            "destination",
            format!(
                "a return must go back to '{}', the previous unit, not '{}'",
                previous, unit
            ),
        )),
        _ => Ok(previous.to_string()),
    }
}

/// Unit a reopened case lands in: the destination of the movement right
/// before the finalize.
pub(crate) fn reopen_destination(case: &Case, history: &[Movement]) -> Result<String> {
    if !case.is_finalized() {
        return Err(CaseflowError::InvalidState(format!(
            "case '{}' is not finalized",
            case.id
        )));
    }
    let finalize_at = history
        .iter()
        .rposition(|m| m.effect == Effect::Finalize)
        .ok_or_else(|| {
            CaseflowError::InvalidState(format!("case '{}' has no finalize movement", case.id))
        })?;
    finalize_at
        .checked_sub(1)
        .map(|i| history[i].to_unit.clone())
        .ok_or_else(|| {
            CaseflowError::InvalidState(format!(
                "case '{}' was finalized without a prior movement",
                case.id
            ))
        })
}

/// Builds the movement that follows the case's latest one.
pub(crate) fn next_movement(
    case: &Case,
    actor_id: &str,
    effect: Effect,
    to_unit: &str,
    note: Option<String>,
    occurred_at: DateTime<Utc>,
) -> Movement {
    Movement {
        case_id: case.id.clone(),
        sequence: case.last_sequence + 1,
        from_unit: Some(case.current_unit.clone()),
        to_unit: to_unit.to_string(),
        effect,
        actor_id: actor_id.to_string(),
        occurred_at,
        note,
    }
}

/// Moves the derived state of `case` past `movement`.
pub(crate) fn advance(case: &mut Case, movement: &Movement) {
    case.current_unit = movement.to_unit.clone();
    case.status = movement.effect.resulting_status();
    case.last_sequence = movement.sequence;
    case.updated_at = movement.occurred_at;
}
