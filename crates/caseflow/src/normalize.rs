//! Text normalization shared by the ledger and the import pipeline.
//!
//! Case identifiers typed by hand and identifiers read from spreadsheets
//! must land on the same key, so both go through [`canonical_case_id`].

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Separator used between the alphanumeric runs of a canonical identifier.
pub const CASE_ID_SEPARATOR: char = '/';

/// Removes accents by decomposing (NFKD) and dropping combining marks.
///
/// `"Situação"` → `"Situacao"`, `"nº"` → `"no"`.
pub fn fold_diacritics(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Trims and collapses every run of whitespace (including NBSP) to one space.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form of a case identifier.
///
/// Accents are folded, letters upper-cased, and every run of punctuation or
/// whitespace between alphanumeric runs becomes a single `/`. Leading and
/// trailing separators are dropped. Returns `None` when nothing alphanumeric
/// is left.
///
/// - `" 2024/001 "` → `2024/001`
/// - `"2024-001"` → `2024/001`
/// - `"proc. 12 / 2024"` → `PROC/12/2024`
pub fn canonical_case_id(raw: &str) -> Option<String> {
    let folded = fold_diacritics(raw);
    let mut out = String::with_capacity(folded.len());
    let mut pending_separator = false;

    for c in folded.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push(CASE_ID_SEPARATOR);
            }
            pending_separator = false;
            out.extend(c.to_uppercase());
        } else {
            pending_separator = true;
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Lower-case, accent-free alphanumeric tokens of a header or alias.
pub fn tokens(input: &str) -> Vec<String> {
    fold_diacritics(input)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
