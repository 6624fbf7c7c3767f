//! Turns uploaded bytes into a header row and data rows.
//!
//! Spreadsheet containers (XLSX, XLS, ODS) are read with calamine; anything
//! else is treated as delimited text.

use std::borrow::Cow;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::Timelike;
use encoding_rs::WINDOWS_1252;
use tracing::debug;

use super::model::RawRow;
use crate::config::ImportConfig;
use crate::dates::from_excel_serial;
use crate::error::{CaseflowError, Result};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// Header and non-blank data rows of the first worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Parses an upload, enforcing the configured size limits.
pub fn read_spreadsheet(bytes: &[u8], limits: &ImportConfig) -> Result<ParsedSheet> {
    if bytes.is_empty() {
        return Err(CaseflowError::Format("the upload is empty".to_string()));
    }
    if bytes.len() > limits.max_bytes {
        return Err(CaseflowError::Format(format!(
            "upload is {} bytes, the limit is {}",
            bytes.len(),
            limits.max_bytes
        )));
    }

    let table = if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        read_workbook(bytes, limits)?
    } else {
        read_delimited(bytes, limits)?
    };

    let sheet = split_header(table)?;
    if sheet.headers.len() > limits.max_columns {
        return Err(CaseflowError::Format(format!(
            "{} columns found, the limit is {}",
            sheet.headers.len(),
            limits.max_columns
        )));
    }
    if sheet.rows.len() > limits.max_rows {
        return Err(too_many_rows(limits));
    }
    debug!(
        columns = sheet.headers.len(),
        rows = sheet.rows.len(),
        "Spreadsheet parsed"
    );
    Ok(sheet)
}

/// Rows as (1-based row number, cells).
type Table = Vec<(usize, Vec<String>)>;

fn too_many_rows(limits: &ImportConfig) -> CaseflowError {
    CaseflowError::Format(format!(
        "more than {} data rows found",
        limits.max_rows
    ))
}

fn read_workbook(bytes: &[u8], limits: &ImportConfig) -> Result<Table> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| CaseflowError::Format(format!("cannot open workbook: {}", e)))?;

    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| CaseflowError::Format("the workbook has no worksheets".to_string()))?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| CaseflowError::Format(format!("cannot read sheet '{}': {}", first, e)))?;

    let offset = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let first_column = range.start().map(|(_, col)| col as usize).unwrap_or(0);

    // The used range bounds the sheet; refuse it before building any rows.
    let (height, width) = range.get_size();
    if height > limits.max_rows.saturating_add(1) {
        return Err(too_many_rows(limits));
    }
    if first_column + width > limits.max_columns {
        return Err(CaseflowError::Format(format!(
            "sheet spans {} columns, the limit is {}",
            first_column + width,
            limits.max_columns
        )));
    }

    Ok(range
        .rows()
        .enumerate()
        .map(|(i, cells)| {
            let mut row = vec![String::new(); first_column];
            row.extend(cells.iter().map(cell_string));
            (offset + i + 1, row)
        })
        .collect())
}

fn cell_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(v) => format!("{v}"),
        Data::Int(v) => format!("{v}"),
        Data::Bool(v) => v.to_string(),
        Data::DateTime(dt) => match from_excel_serial(dt.as_f64()) {
            Some(d) if d.num_seconds_from_midnight() == 0 => d.format("%Y-%m-%d").to_string(),
            Some(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{}", dt.as_f64()),
        },
        other => other.to_string(),
    }
}

fn read_delimited(bytes: &[u8], limits: &ImportConfig) -> Result<Table> {
    // Registries exported from older office suites are Windows-1252.
    let text: Cow<'_, str> = match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => WINDOWS_1252.decode(bytes).0,
    };
    let text = text.trim_start_matches('\u{feff}');
    if text.contains('\0') {
        return Err(CaseflowError::Format(
            "the upload is neither a spreadsheet nor delimited text".to_string(),
        ));
    }

    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut table = Vec::new();
    let mut filled = 0usize;
    for (i, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| CaseflowError::Format(format!("malformed row {}: {}", i + 1, e)))?;
        if record.iter().any(|c| !c.is_empty()) {
            filled += 1;
            // Header plus the allowed data rows.
            if filled > limits.max_rows.saturating_add(1) {
                return Err(too_many_rows(limits));
            }
        }
        // The reader skips empty lines, so take the row number from the source.
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(i + 1);
        table.push((row, record.iter().map(str::to_string).collect()));
    }
    Ok(table)
}

/// Picks the candidate delimiter that occurs most often, outside quotes, in
/// the first non-empty line. Ties go to the earlier candidate.
fn sniff_delimiter(text: &str) -> u8 {
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut quoted = false;
    for b in line.bytes() {
        if b == b'"' {
            quoted = !quoted;
        } else if !quoted {
            if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|d| *d == b) {
                counts[i] += 1;
            }
        }
    }
    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

/// First non-blank row is the header; later blank rows are dropped.
fn split_header(table: Table) -> Result<ParsedSheet> {
    let mut rows = table
        .into_iter()
        .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()));

    let (_, mut headers) = rows
        .next()
        .ok_or_else(|| CaseflowError::Format("no header row found".to_string()))?;
    while headers.last().is_some_and(|h| h.trim().is_empty()) {
        headers.pop();
    }
    let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
    let width = headers.len();

    let rows = rows
        .map(|(row_index, mut cells)| {
            cells.resize(width.max(cells.len()), String::new());
            RawRow { row_index, cells }
        })
        .collect();

    Ok(ParsedSheet { headers, rows })
}
