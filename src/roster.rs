//! Command-line driver: reads the uploaded workbook, runs the ingestion
//! pipeline against the local stores, and reports the ledger. With
//! `--reference`, the produced summary is compared against a reference file
//! and any difference fails the run.

use log::{info, warn};
use snafu::{prelude::*, Snafu};

use std::fs;

use roster_ingest::{
    ingest_roster, CredentialPolicy, IngestError, IngestOptions, IngestionSummary, NoBlobStore,
};
use text_diff::print_diff;

use crate::args::Args;
use crate::roster::stores::{DirBlobStore, JsonRecordStore};

pub mod stores;

#[derive(Debug, Snafu)]
pub enum ImportError {
    #[snafu(display("could not read the roster file {path}"))]
    ReadingRoster {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("could not open the record store {path}"))]
    OpeningStore {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("could not parse the record store {path}"))]
    ParsingStore {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("could not encode the record store {path}"))]
    EncodingStore {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("could not write {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("could not read the reference summary {path}"))]
    OpeningReference {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("could not encode or decode summary JSON"))]
    SummaryJson { source: serde_json::Error },
    #[snafu(display("{source}"))]
    Ingestion { source: Box<IngestError> },
    #[snafu(display("the produced summary differs from the reference {path}"))]
    ReferenceMismatch { path: String },
}

pub type BImportResult<T> = Result<T, Box<ImportError>>;

pub fn run_import(args: &Args) -> BImportResult<()> {
    let bytes = fs::read(&args.input).context(ReadingRosterSnafu {
        path: args.input.clone(),
    })?;
    info!("run_import: read {} bytes from {}", bytes.len(), args.input);

    let mut options = IngestOptions::default();
    if let Some(pattern) = &args.identifier_pattern {
        options.identifier_pattern = pattern.clone();
    }
    if let Some(salt) = &args.credential_salt {
        options.credential_policy = CredentialPolicy::Derived { salt: salt.clone() };
    }

    let mut store = JsonRecordStore::open(&args.store)?;
    let summary = match &args.media_dir {
        Some(dir) => {
            let mut blobs = DirBlobStore::new(dir);
            ingest_roster(&bytes, &mut store, &mut blobs, &options).context(IngestionSnafu {})?
        }
        None => {
            ingest_roster(&bytes, &mut store, &mut NoBlobStore, &options)
                .context(IngestionSnafu {})?
        }
    };
    store.flush()?;

    info!(
        "run_import: {} created, {} skipped, {} errors",
        summary.created_count, summary.skipped_count, summary.error_count
    );
    report(args, &summary)
}

fn report(args: &Args, summary: &IngestionSummary) -> BImportResult<()> {
    let pretty = serde_json::to_string_pretty(summary).context(SummaryJsonSnafu {})?;
    match args.out.as_deref() {
        None | Some("stdout") => println!("{}", pretty),
        Some(path) => {
            fs::write(path, &pretty).context(WritingOutputSnafu { path })?;
            info!("report: wrote summary to {}", path);
        }
    }

    // The reference summary, if provided for comparison.
    if let Some(reference_path) = &args.reference {
        let reference_str = fs::read_to_string(reference_path).context(OpeningReferenceSnafu {
            path: reference_path.clone(),
        })?;
        let reference: IngestionSummary =
            serde_json::from_str(&reference_str).context(SummaryJsonSnafu {})?;
        let pretty_reference =
            serde_json::to_string_pretty(&reference).context(SummaryJsonSnafu {})?;
        if pretty_reference != pretty {
            warn!("report: found differences with the reference summary");
            print_diff(pretty_reference.as_str(), pretty.as_str(), "\n");
            return Err(Box::new(ImportError::ReferenceMismatch {
                path: reference_path.clone(),
            }));
        }
    }
    Ok(())
}
