//! Row normalizer and validator.
//!
//! Turns one grid row (plus its associated image, if any) into an accepted
//! [`RosterRow`], a soft skip, or a hard validation error. The email
//! normalization is deliberately forgiving: manually entered rosters bury
//! addresses under numbering prefixes, stray labels and punctuation, and a
//! student without an email yet is routine input rather than an error.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::columns::ColumnMap;
use crate::grid::{CellValue, ExtractedImage};

/// An accepted roster row, immutable once built and consumed exactly once
/// by the orchestrator. `source_row_number` is the 1-based spreadsheet row
/// including the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub source_row_number: usize,
    pub name: String,
    pub identifier: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub image: Option<ExtractedImage>,
}

/// The normalizer's verdict for one data row.
#[derive(Debug)]
pub enum RowOutcome {
    Accepted(Box<RosterRow>),
    /// A blank/trailing row; not reported anywhere.
    Blank,
    /// Routine, expected gaps (no email yet); reported in the skip bucket.
    Skipped { reason: String },
    /// The row is excluded and the reason lands in the error bucket.
    Invalid { reason: String },
}

pub fn normalize_row(
    source_row_number: usize,
    cells: &[CellValue],
    columns: &ColumnMap,
    image: Option<ExtractedImage>,
    identifier_pattern: &Regex,
) -> RowOutcome {
    let name = match display_at(cells, columns.name) {
        Some(v) => v.trim().to_string(),
        None if cells.iter().all(CellValue::is_blank) => return RowOutcome::Blank,
        None => {
            return RowOutcome::Invalid {
                reason: format!("row {}: missing name", source_row_number),
            }
        }
    };

    let identifier = match display_at(cells, columns.identifier) {
        Some(v) => v.trim().to_string(),
        None => {
            return RowOutcome::Invalid {
                reason: format!("row {}: missing identifier", source_row_number),
            }
        }
    };
    if !identifier_pattern.is_match(&identifier) {
        return RowOutcome::Invalid {
            reason: format!(
                "row {}: identifier {:?} does not match the expected shape {}",
                source_row_number,
                identifier,
                identifier_pattern.as_str()
            ),
        };
    }

    let email_raw = match display_at(cells, columns.email) {
        Some(v) => v,
        None => {
            return RowOutcome::Skipped {
                reason: format!("row {}: no email address, skipped", source_row_number),
            }
        }
    };
    let email = match normalize_email(&email_raw) {
        Some(e) => e,
        None => {
            debug!(
                "normalize_row: row {}: no email found in {:?}",
                source_row_number, email_raw
            );
            return RowOutcome::Skipped {
                reason: format!(
                    "row {}: could not find an email address in {:?}, skipped",
                    source_row_number, email_raw
                ),
            };
        }
    };

    // Phone is passed through verbatim; it is never validated.
    let phone = columns.phone.and_then(|idx| display_at(cells, idx));

    RowOutcome::Accepted(Box::new(RosterRow {
        source_row_number,
        name,
        identifier,
        phone,
        email: Some(email),
        image,
    }))
}

fn display_at(cells: &[CellValue], idx: usize) -> Option<String> {
    cells.get(idx).and_then(|c| c.display())
}

fn strict_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9._%+-]*@[A-Za-z0-9][A-Za-z0-9.-]*\.[A-Za-z]{2,}$")
            .expect("static email pattern")
    })
}

fn embedded_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z][A-Za-z0-9._%+-]*@[A-Za-z0-9][A-Za-z0-9.-]*\.[A-Za-z]{2,}")
            .expect("static email pattern")
    })
}

/// Digs an email address out of habitually messy manual data entry.
///
/// Graduated fallback: strip whitespace; accept the whole string when it
/// already looks like an address; otherwise take the first embedded
/// substring that does; otherwise expand around the first `@`. The result
/// is always lower-cased. `None` means the cell holds no address at all.
pub fn normalize_email(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    if strict_email().is_match(&cleaned) {
        return Some(cleaned.to_lowercase());
    }
    if let Some(found) = embedded_email().find(&cleaned) {
        let candidate = found.as_str();
        if strict_email().is_match(candidate) {
            return Some(candidate.to_lowercase());
        }
    }
    expand_around_at(&cleaned)
        .filter(|candidate| strict_email().is_match(candidate))
        .map(|candidate| candidate.to_lowercase())
}

/// Last-resort recovery: grow a candidate address outwards from the first
/// `@`, left over local-part-legal characters and right over domain-legal
/// ones, then drop any leading characters that cannot open a local part.
fn expand_around_at(s: &str) -> Option<String> {
    let at = s.find('@')?;
    let bytes = s.as_bytes();
    let is_local = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'%' | b'+' | b'-');
    let is_domain = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-');

    let mut start = at;
    while start > 0 && is_local(bytes[start - 1]) {
        start -= 1;
    }
    while start < at && !bytes[start].is_ascii_alphabetic() {
        start += 1;
    }
    if start == at {
        return None;
    }
    let mut end = at + 1;
    while end < bytes.len() && is_domain(bytes[end]) {
        end += 1;
    }
    if end == at + 1 {
        return None;
    }
    Some(s[start..end].to_string())
}
