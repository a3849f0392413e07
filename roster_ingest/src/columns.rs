//! Header resolver.
//!
//! Maps the header row of the grid to the canonical field slots. Matching is
//! case-insensitive and tolerates a trailing colon; the image column is
//! recognized by substring against a list of synonyms. `NAME`, `INDEX NO`
//! and `EMAIL` are mandatory; the whole ingestion is rejected before any row
//! is processed when one is absent.

use log::debug;

use crate::grid::CellValue;
use crate::IngestError;

pub const NAME_LABEL: &str = "NAME";
pub const IDENTIFIER_LABEL: &str = "INDEX NO";
pub const PHONE_LABEL: &str = "PHONE NO";
pub const EMAIL_LABEL: &str = "EMAIL";

/// Any header containing one of these is treated as the image column.
pub const IMAGE_HEADER_SYNONYMS: [&str; 5] = ["PICTURE", "PHOTO", "PASSPORT", "IMAGE", "AVATAR"];

/// Zero-based grid column indices for the canonical fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub name: usize,
    pub identifier: usize,
    pub email: usize,
    pub phone: Option<usize>,
    pub image: Option<usize>,
}

pub fn resolve_columns(header: &[CellValue]) -> Result<ColumnMap, Box<IngestError>> {
    let mut name = None;
    let mut identifier = None;
    let mut email = None;
    let mut phone = None;
    let mut image = None;

    for (idx, cell) in header.iter().enumerate() {
        let label = match cell.display() {
            Some(text) => normalize_header(&text),
            None => continue,
        };
        match label.as_str() {
            NAME_LABEL => {
                name.get_or_insert(idx);
            }
            IDENTIFIER_LABEL => {
                identifier.get_or_insert(idx);
            }
            PHONE_LABEL => {
                phone.get_or_insert(idx);
            }
            EMAIL_LABEL => {
                email.get_or_insert(idx);
            }
            other => {
                if image.is_none() && IMAGE_HEADER_SYNONYMS.iter().any(|s| other.contains(s)) {
                    image = Some(idx);
                }
            }
        }
    }

    let mut missing: Vec<String> = Vec::new();
    if name.is_none() {
        missing.push(NAME_LABEL.to_string());
    }
    if identifier.is_none() {
        missing.push(IDENTIFIER_LABEL.to_string());
    }
    if email.is_none() {
        missing.push(EMAIL_LABEL.to_string());
    }
    if !missing.is_empty() {
        return Err(Box::new(IngestError::MissingColumns { columns: missing }));
    }

    let map = ColumnMap {
        name: name.unwrap_or(0),
        identifier: identifier.unwrap_or(0),
        email: email.unwrap_or(0),
        phone,
        image,
    };
    debug!("resolve_columns: {:?}", map);
    Ok(map)
}

fn normalize_header(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_suffix(':').unwrap_or(trimmed);
    trimmed.trim().to_uppercase()
}
