//! Bulk roster ingestion for a student election portal.
//!
//! Administrators upload a spreadsheet of students; this crate parses the
//! tabular rows, extracts the photos embedded in the workbook's drawing
//! layer, matches each photo to the row it belongs to, normalizes the messy
//! free-text fields, and drives record creation through the caller's
//! [`RecordStore`] and [`BlobStore`], producing a per-row ledger instead of
//! failing the whole upload on a single bad row.

pub mod associate;
pub mod columns;
pub mod config;
pub mod grid;
pub mod ingest;
pub mod normalize;
pub mod workbook;

use snafu::Snafu;

pub use crate::config::{
    CredentialPolicy, IngestOptions, DEFAULT_IDENTIFIER_PATTERN, DEFAULT_MAX_UPLOAD_BYTES,
};
pub use crate::grid::{CellValue, ExtractedImage, RawGrid};
pub use crate::ingest::{
    ingest_roster, BlobError, BlobStore, IngestionOutcome, IngestionSummary, NewRecord,
    NoBlobStore, RecordStore, StoreError, StudentRecord,
};
pub use crate::normalize::{normalize_email, RosterRow};

/// Structural failures that abort an ingestion before any row is processed.
///
/// Data-quality problems in individual rows never surface here; they are
/// reported through the [`IngestionSummary`] ledger instead.
#[derive(Debug, Snafu)]
pub enum IngestError {
    #[snafu(display(
        "the uploaded file is {actual} bytes which exceeds the {limit}-byte limit"
    ))]
    OversizedUpload { actual: usize, limit: usize },

    #[snafu(display("could not parse the workbook: {source}"))]
    WorkbookParse { source: calamine::XlsxError },

    #[snafu(display("the workbook has no sheets"))]
    NoSheets {},

    #[snafu(display("the first sheet has no rows"))]
    EmptySheet {},

    #[snafu(display("missing mandatory column(s): {}", columns.join(", ")))]
    MissingColumns { columns: Vec<String> },

    #[snafu(display("invalid identifier pattern {pattern:?}: {source}"))]
    BadIdentifierPattern {
        pattern: String,
        source: regex::Error,
    },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type IngestResult<T> = Result<T, IngestError>;
pub type BIngestResult<T> = Result<T, Box<IngestError>>;
