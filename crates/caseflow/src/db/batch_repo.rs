//! Import batch repository. The batch itself is stored as a JSON body; only
//! the columns used for lookups are broken out.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A stored import batch row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    pub id: String,
    pub created_by: String,
    pub status: String,
    /// Serialized batch.
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
    pub committed_at: Option<String>,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            created_by: row.get(1)?,
            status: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            committed_at: row.get(6)?,
        })
    }
}

const SELECT_BATCH: &str =
    "SELECT id, created_by, status, body, created_at, updated_at, committed_at FROM import_batches";

pub fn insert(conn: &Connection, row: &BatchRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO import_batches (id, created_by, status, body, created_at, updated_at, committed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.id,
            row.created_by,
            row.status,
            row.body,
            row.created_at,
            row.updated_at,
            row.committed_at,
        ],
    )?;
    Ok(())
}

/// Rewrites status, body and timestamps if the stored status is still
/// `expected_status`. Returns false when the batch is gone or has moved on.
pub fn update(conn: &Connection, row: &BatchRow, expected_status: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE import_batches SET status = ?2, body = ?3, updated_at = ?4, committed_at = ?5
         WHERE id = ?1 AND status = ?6",
        params![
            row.id,
            row.status,
            row.body,
            row.updated_at,
            row.committed_at,
            expected_status,
        ],
    )?;
    Ok(changed == 1)
}

pub fn find(conn: &Connection, id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    let sql = format!("{} WHERE id = ?1", SELECT_BATCH);
    Ok(conn
        .query_row(&sql, params![id], BatchRow::from_row)
        .optional()?)
}

/// Batches created by one actor, newest first.
pub fn list_by_creator(conn: &Connection, created_by: &str) -> Result<Vec<BatchRow>, DatabaseError> {
    let sql = format!(
        "{} WHERE created_by = ?1 ORDER BY created_at DESC, id",
        SELECT_BATCH
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![created_by], BatchRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
