//! Case repository: rows of the `cases` table joined with their latest movement.
//!
//! Functions take a `&Connection` so callers can compose them inside a
//! transaction (`Transaction` derefs to `Connection`).

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;
use crate::model::{Case, CaseStatus, Effect};

/// Selects a case with the derived unit, status and sequence of its latest movement.
const SELECT_CASE: &str = "SELECT c.id, c.title, c.extra_fields, c.version, c.created_at,
        c.updated_at, m.sequence, m.to_unit, m.effect
     FROM cases c
     JOIN movements m ON m.case_id = c.id
      AND m.sequence = (SELECT MAX(sequence) FROM movements WHERE case_id = c.id)";

/// Query filter parameters for case listing.
#[derive(Debug, Default, Clone)]
pub struct CaseFilter {
    pub unit: Option<String>,
    pub status: Option<CaseStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Formats a timestamp the way every table stores it.
pub fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    column: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| DatabaseError::UnknownValue {
            column,
            value: value.to_string(),
        })
}

/// Raw joined row before timestamps and JSON are decoded.
struct JoinedRow {
    id: String,
    title: String,
    extra_fields: String,
    version: u32,
    created_at: String,
    updated_at: String,
    sequence: u32,
    to_unit: String,
    effect: String,
}

impl JoinedRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            extra_fields: row.get(2)?,
            version: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            sequence: row.get(6)?,
            to_unit: row.get(7)?,
            effect: row.get(8)?,
        })
    }

    fn into_case(self) -> Result<Case, DatabaseError> {
        let effect = Effect::parse(&self.effect).ok_or(DatabaseError::UnknownValue {
            column: "movements.effect",
            value: self.effect.clone(),
        })?;
        let extra_fields: BTreeMap<String, String> = serde_json::from_str(&self.extra_fields)
            .map_err(|source| DatabaseError::Json {
                column: "cases.extra_fields",
                source,
            })?;

        Ok(Case {
            id: self.id,
            title: self.title,
            current_unit: self.to_unit,
            status: effect.resulting_status(),
            extra_fields,
            version: self.version,
            last_sequence: self.sequence,
            created_at: parse_timestamp("cases.created_at", &self.created_at)?,
            updated_at: parse_timestamp("cases.updated_at", &self.updated_at)?,
        })
    }
}

fn encode_fields(fields: &BTreeMap<String, String>) -> Result<String, DatabaseError> {
    serde_json::to_string(fields).map_err(|source| DatabaseError::Json {
        column: "cases.extra_fields",
        source,
    })
}

/// Inserts the case row. The creating movement must be inserted in the same
/// transaction, otherwise the case is invisible to [`find`].
pub fn insert(conn: &Connection, case: &Case) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO cases (id, title, extra_fields, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            case.id,
            case.title,
            encode_fields(&case.extra_fields)?,
            case.version,
            timestamp(&case.created_at),
            timestamp(&case.updated_at),
        ],
    )?;
    Ok(())
}

/// Returns whether a case row exists, with or without movements.
pub fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM cases WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Finds a case by its canonical identifier.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Case>, DatabaseError> {
    let sql = format!("{} WHERE c.id = ?1", SELECT_CASE);
    let row = conn
        .query_row(&sql, params![id], JoinedRow::from_row)
        .optional()?;
    row.map(JoinedRow::into_case).transpose()
}

/// Bumps the version if it still equals `expected_version`.
///
/// Returns false when another writer got there first.
pub fn bump_version(
    conn: &Connection,
    id: &str,
    expected_version: u32,
    updated_at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE cases SET version = version + 1, updated_at = ?3 WHERE id = ?1 AND version = ?2",
        params![id, expected_version, timestamp(updated_at)],
    )?;
    Ok(changed == 1)
}

/// Overwrites title and extra fields if the version still matches, bumping it.
pub fn update_details(
    conn: &Connection,
    id: &str,
    expected_version: u32,
    title: &str,
    extra_fields: &BTreeMap<String, String>,
    updated_at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE cases SET title = ?3, extra_fields = ?4, version = version + 1, updated_at = ?5
         WHERE id = ?1 AND version = ?2",
        params![
            id,
            expected_version,
            title,
            encode_fields(extra_fields)?,
            timestamp(updated_at)
        ],
    )?;
    Ok(changed == 1)
}

/// Deletes a case and, through the foreign key, its movements.
pub fn delete(conn: &Connection, id: &str, expected_version: u32) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM cases WHERE id = ?1 AND version = ?2",
        params![id, expected_version],
    )?;
    Ok(changed == 1)
}

/// Queries cases with filters, returning (cases, total_count).
pub fn query(conn: &Connection, filter: &CaseFilter) -> Result<(Vec<Case>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref unit) = filter.unit {
        conditions.push(format!("m.to_unit = ?{}", param_values.len() + 1));
        param_values.push(Box::new(unit.clone()));
    }
    if let Some(status) = filter.status {
        let placeholders: Vec<String> = status
            .effects()
            .iter()
            .map(|effect| {
                param_values.push(Box::new(effect.as_str()));
                format!("?{}", param_values.len())
            })
            .collect();
        conditions.push(format!("m.effect IN ({})", placeholders.join(", ")));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM ({} {})", SELECT_CASE, where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "{} {} ORDER BY c.created_at DESC, c.id LIMIT ?{} OFFSET ?{}",
        SELECT_CASE,
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), JoinedRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let cases = rows
        .into_iter()
        .map(JoinedRow::into_case)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((cases, total))
}
