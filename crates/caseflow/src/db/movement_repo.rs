//! Movement repository. Rows are append-only.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::case_repo::{parse_timestamp, timestamp};
use super::DatabaseError;
use crate::model::{Effect, Movement};

const SELECT_MOVEMENT: &str = "SELECT case_id, sequence, from_unit, to_unit, effect, actor_id,
        occurred_at, note
     FROM movements";

struct MovementRow {
    case_id: String,
    sequence: u32,
    from_unit: Option<String>,
    to_unit: String,
    effect: String,
    actor_id: String,
    occurred_at: String,
    note: Option<String>,
}

impl MovementRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            case_id: row.get(0)?,
            sequence: row.get(1)?,
            from_unit: row.get(2)?,
            to_unit: row.get(3)?,
            effect: row.get(4)?,
            actor_id: row.get(5)?,
            occurred_at: row.get(6)?,
            note: row.get(7)?,
        })
    }

    fn into_movement(self) -> Result<Movement, DatabaseError> {
        let effect = Effect::parse(&self.effect).ok_or(DatabaseError::UnknownValue {
            column: "movements.effect",
            value: self.effect.clone(),
        })?;
        Ok(Movement {
            case_id: self.case_id,
            sequence: self.sequence,
            from_unit: self.from_unit,
            to_unit: self.to_unit,
            effect,
            actor_id: self.actor_id,
            occurred_at: parse_timestamp("movements.occurred_at", &self.occurred_at)?,
            note: self.note,
        })
    }
}

/// Appends a movement. The (case_id, sequence) primary key rejects duplicates.
pub fn insert(conn: &Connection, movement: &Movement) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO movements (case_id, sequence, from_unit, to_unit, effect, actor_id,
            occurred_at, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            movement.case_id,
            movement.sequence,
            movement.from_unit,
            movement.to_unit,
            movement.effect.as_str(),
            movement.actor_id,
            timestamp(&movement.occurred_at),
            movement.note,
        ],
    )?;
    Ok(())
}

/// Full history of a case, ordered by sequence.
pub fn list(conn: &Connection, case_id: &str) -> Result<Vec<Movement>, DatabaseError> {
    let sql = format!("{} WHERE case_id = ?1 ORDER BY sequence ASC", SELECT_MOVEMENT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![case_id], MovementRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(MovementRow::into_movement).collect()
}

/// The most recent movement of a case.
pub fn latest(conn: &Connection, case_id: &str) -> Result<Option<Movement>, DatabaseError> {
    let sql = format!(
        "{} WHERE case_id = ?1 ORDER BY sequence DESC LIMIT 1",
        SELECT_MOVEMENT
    );
    let row = conn
        .query_row(&sql, params![case_id], MovementRow::from_row)
        .optional()?;
    row.map(MovementRow::into_movement).transpose()
}
