//! Ingestion orchestrator.
//!
//! Drives the end-to-end pipeline: load the workbook, resolve the header,
//! associate images, normalize rows, then for each accepted row check for a
//! duplicate, create the record and upload its photo best-effort. Rows are
//! processed strictly sequentially and in row order, so the duplicate check
//! observes creations made earlier in the same upload and image assignment
//! stays reproducible across runs on the same file.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, Snafu};

use crate::associate::associate_images;
use crate::columns::resolve_columns;
use crate::config::{CredentialPolicy, IngestOptions};
use crate::grid::ExtractedImage;
use crate::normalize::{normalize_row, RosterRow, RowOutcome};
use crate::workbook::load_workbook;
use crate::{BIngestResult, EmptySheetSnafu, OversizedUploadSnafu};

/// Failures surfaced by a [`RecordStore`] implementation.
#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("record store backend error: {message}"))]
    Backend { message: String },
    #[snafu(display("identifier {identifier} already exists"))]
    DuplicateIdentifier { identifier: String },
}

/// Failures surfaced by a [`BlobStore`] implementation. `NotConfigured` is
/// deliberately distinguishable from an upload that was tried and failed.
#[derive(Debug, Snafu)]
pub enum BlobError {
    #[snafu(display("no blob store is configured"))]
    NotConfigured,
    #[snafu(display("upload of {path} failed: {message}"))]
    Upload { path: String, message: String },
}

/// The relational backend, reduced to the three operations ingestion needs.
pub trait RecordStore {
    fn exists_by_identifier(&self, identifier: &str) -> Result<bool, StoreError>;
    fn create(&mut self, fields: &NewRecord) -> Result<StudentRecord, StoreError>;
    fn update_image_url(&mut self, record_id: &str, url: &str)
        -> Result<StudentRecord, StoreError>;
}

/// The object storage backend: upload bytes, get a URL back.
pub trait BlobStore {
    fn upload(&mut self, bytes: &[u8], content_type: &str, path: &str)
        -> Result<String, BlobError>;
}

/// A [`BlobStore`] for deployments without object storage; every upload
/// reports [`BlobError::NotConfigured`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBlobStore;

impl BlobStore for NoBlobStore {
    fn upload(&mut self, _: &[u8], _: &str, _: &str) -> Result<String, BlobError> {
        Err(BlobError::NotConfigured)
    }
}

/// The fields handed to [`RecordStore::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub identifier: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub credential: String,
}

/// A stored student record as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub identifier: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub credential: String,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// The disposition of one processed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    Created(StudentRecord),
    Skipped(String),
    Failed { row: usize, reason: String },
}

/// The ledger returned by one ingestion run. Data-quality problems land in
/// these buckets; the run itself only fails structurally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    #[serde(rename = "createdCount")]
    pub created_count: usize,
    #[serde(rename = "skippedCount")]
    pub skipped_count: usize,
    #[serde(rename = "errorCount")]
    pub error_count: usize,
    pub created: Vec<StudentRecord>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl IngestionSummary {
    fn from_outcomes(
        outcomes: Vec<IngestionOutcome>,
        upload_errors: Vec<String>,
        warnings: Vec<String>,
    ) -> IngestionSummary {
        let mut summary = IngestionSummary {
            warnings,
            ..IngestionSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                IngestionOutcome::Created(record) => summary.created.push(record),
                IngestionOutcome::Skipped(reason) => summary.skipped.push(reason),
                IngestionOutcome::Failed { reason, .. } => summary.errors.push(reason),
            }
        }
        summary.errors.extend(upload_errors);
        summary.created_count = summary.created.len();
        summary.skipped_count = summary.skipped.len();
        summary.error_count = summary.errors.len();
        summary
    }
}

/// Ingests one uploaded roster workbook.
///
/// Always returns a summary for data-quality problems in individual rows;
/// only structural failures (oversized or unparseable file, missing
/// mandatory columns) abort before rows are attempted.
pub fn ingest_roster<S: RecordStore, B: BlobStore>(
    bytes: &[u8],
    store: &mut S,
    blobs: &mut B,
    options: &IngestOptions,
) -> BIngestResult<IngestionSummary> {
    ensure!(
        bytes.len() <= options.max_upload_bytes,
        OversizedUploadSnafu {
            actual: bytes.len(),
            limit: options.max_upload_bytes,
        }
    );
    let identifier_pattern = options.compiled_identifier_pattern()?;

    let loaded = load_workbook(bytes)?;
    let mut warnings = loaded.warnings;
    let header = loaded.grid.header().context(EmptySheetSnafu {})?;
    let columns = resolve_columns(header)?;

    let assignment = associate_images(&loaded.grid, &columns, &loaded.images);
    if assignment.ordered_fallback {
        warnings.push(
            "image anchors were unavailable; images were matched to rows in file order and \
             should be reviewed"
                .to_string(),
        );
    }

    // Move each image out of the pool and onto its assigned row.
    let mut pool: Vec<Option<ExtractedImage>> = loaded.images.into_iter().map(Some).collect();
    let mut images_by_row: HashMap<usize, ExtractedImage> = HashMap::new();
    for (sheet_row, idx) in assignment.iter() {
        if let Some(slot) = pool.get_mut(idx) {
            if let Some(img) = slot.take() {
                images_by_row.insert(sheet_row, img);
            }
        }
    }

    info!(
        "ingest_roster: {} data rows, {} images assigned",
        loaded.grid.row_count().saturating_sub(1),
        images_by_row.len()
    );

    let mut outcomes: Vec<IngestionOutcome> = Vec::new();
    let mut upload_errors: Vec<String> = Vec::new();
    let mut blobs_unavailable = false;

    for (sheet_row, cells) in loaded.grid.data_rows() {
        let row_number = sheet_row + 1;
        let image = images_by_row.remove(&sheet_row);
        match normalize_row(row_number, cells, &columns, image, &identifier_pattern) {
            RowOutcome::Blank => {}
            RowOutcome::Skipped { reason } => outcomes.push(IngestionOutcome::Skipped(reason)),
            RowOutcome::Invalid { reason } => {
                outcomes.push(IngestionOutcome::Failed {
                    row: row_number,
                    reason,
                });
            }
            RowOutcome::Accepted(row) => {
                let outcome = drive_row(
                    &row,
                    store,
                    blobs,
                    &options.credential_policy,
                    &mut upload_errors,
                    &mut warnings,
                    &mut blobs_unavailable,
                );
                outcomes.push(outcome);
            }
        }
    }

    let summary = IngestionSummary::from_outcomes(outcomes, upload_errors, warnings);
    info!(
        "ingest_roster: {} created, {} skipped, {} errors",
        summary.created_count, summary.skipped_count, summary.error_count
    );
    Ok(summary)
}

/// Runs one accepted row to completion: duplicate check, create, then the
/// best-effort image upload. Nothing here aborts the batch; store and blob
/// failures become ledger entries.
fn drive_row<S: RecordStore, B: BlobStore>(
    row: &RosterRow,
    store: &mut S,
    blobs: &mut B,
    credential_policy: &CredentialPolicy,
    upload_errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
    blobs_unavailable: &mut bool,
) -> IngestionOutcome {
    match store.exists_by_identifier(&row.identifier) {
        Ok(true) => {
            debug!(
                "drive_row: row {}: {} already enrolled",
                row.source_row_number, row.identifier
            );
            return IngestionOutcome::Skipped(format!(
                "row {}: identifier {} already enrolled, skipped",
                row.source_row_number, row.identifier
            ));
        }
        Ok(false) => {}
        Err(e) => {
            return IngestionOutcome::Failed {
                row: row.source_row_number,
                reason: format!(
                    "row {} ({}): duplicate check failed: {}",
                    row.source_row_number, row.identifier, e
                ),
            };
        }
    }

    let fields = NewRecord {
        identifier: row.identifier.clone(),
        name: row.name.clone(),
        email: row.email.clone().unwrap_or_default(),
        phone: row.phone.clone(),
        credential: credential_for(row, credential_policy),
    };
    let mut record = match store.create(&fields) {
        Ok(record) => record,
        Err(StoreError::DuplicateIdentifier { identifier }) => {
            // Lost a race against a concurrent upload; the store's
            // uniqueness backstop turned it into a routine skip.
            return IngestionOutcome::Skipped(format!(
                "row {}: identifier {} already enrolled, skipped",
                row.source_row_number, identifier
            ));
        }
        Err(e) => {
            return IngestionOutcome::Failed {
                row: row.source_row_number,
                reason: format!(
                    "row {} ({}): could not create record: {}",
                    row.source_row_number, row.identifier, e
                ),
            };
        }
    };

    if let Some(img) = &row.image {
        if !*blobs_unavailable {
            let path = format!(
                "rosters/{}.{}",
                row.identifier.replace('/', "-"),
                img.extension()
            );
            match blobs.upload(&img.bytes, img.content_type(), &path) {
                Ok(url) => match store.update_image_url(&record.id, &url) {
                    Ok(updated) => record = updated,
                    Err(e) => upload_errors.push(format!(
                        "row {} ({}): storing the image URL failed: {}",
                        row.source_row_number, row.identifier, e
                    )),
                },
                Err(BlobError::NotConfigured) => {
                    warnings.push(
                        "no blob store is configured; student photos were not uploaded"
                            .to_string(),
                    );
                    *blobs_unavailable = true;
                }
                Err(e) => {
                    warn!(
                        "drive_row: row {}: image upload failed: {}",
                        row.source_row_number, e
                    );
                    upload_errors.push(format!(
                        "row {} ({}): image upload failed: {}",
                        row.source_row_number, row.identifier, e
                    ));
                }
            }
        }
    }

    IngestionOutcome::Created(record)
}

fn credential_for(row: &RosterRow, policy: &CredentialPolicy) -> String {
    match policy {
        CredentialPolicy::EmailAsInitial => row.email.clone().unwrap_or_default(),
        CredentialPolicy::Derived { salt } => {
            let digest = sha256::digest(format!(
                "{}:{}:{}",
                salt,
                row.identifier,
                row.email.as_deref().unwrap_or("")
            ));
            digest[..16].to_string()
        }
    }
}
