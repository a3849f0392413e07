//! Local collaborator implementations for the command line: a JSON-file
//! record store and a directory-backed blob store. Deployments with a real
//! database and object storage supply their own [`RecordStore`] and
//! [`BlobStore`] implementations instead.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use roster_ingest::{BlobError, BlobStore, NewRecord, RecordStore, StoreError, StudentRecord};

use crate::roster::{
    BImportResult, EncodingStoreSnafu, OpeningStoreSnafu, ParsingStoreSnafu, WritingOutputSnafu,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    records: Vec<StudentRecord>,
}

/// A record store persisted as one JSON file. Loaded fully at open; written
/// back once per import through [`JsonRecordStore::flush`]. Identifier
/// uniqueness is enforced in memory, which doubles as the backstop for
/// concurrent imports against the same file.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    records: Vec<StudentRecord>,
    identifiers: HashSet<String>,
    dirty: bool,
}

impl JsonRecordStore {
    pub fn open(path: &str) -> BImportResult<JsonRecordStore> {
        let p = Path::new(path);
        let records: Vec<StudentRecord> = if p.exists() {
            let contents = fs::read_to_string(p).context(OpeningStoreSnafu { path })?;
            let file: StoreFile =
                serde_json::from_str(&contents).context(ParsingStoreSnafu { path })?;
            file.records
        } else {
            Vec::new()
        };
        info!(
            "JsonRecordStore: {} with {} existing records",
            path,
            records.len()
        );
        let identifiers = records.iter().map(|r| r.identifier.clone()).collect();
        Ok(JsonRecordStore {
            path: p.to_path_buf(),
            records,
            identifiers,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn flush(&mut self) -> BImportResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let file = StoreFile {
            records: self.records.clone(),
        };
        let contents = serde_json::to_string_pretty(&file).context(EncodingStoreSnafu {
            path: self.path.display().to_string(),
        })?;
        fs::write(&self.path, contents).context(WritingOutputSnafu {
            path: self.path.display().to_string(),
        })?;
        self.dirty = false;
        debug!(
            "JsonRecordStore: flushed {} records to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    fn exists_by_identifier(&self, identifier: &str) -> Result<bool, StoreError> {
        Ok(self.identifiers.contains(identifier))
    }

    fn create(&mut self, fields: &NewRecord) -> Result<StudentRecord, StoreError> {
        if self.identifiers.contains(&fields.identifier) {
            return Err(StoreError::DuplicateIdentifier {
                identifier: fields.identifier.clone(),
            });
        }
        let record = StudentRecord {
            id: format!("rec-{:06}", self.records.len() + 1),
            identifier: fields.identifier.clone(),
            name: fields.name.clone(),
            email: fields.email.clone(),
            phone: fields.phone.clone(),
            credential: fields.credential.clone(),
            image_url: None,
        };
        self.identifiers.insert(record.identifier.clone());
        self.records.push(record.clone());
        self.dirty = true;
        Ok(record)
    }

    fn update_image_url(
        &mut self,
        record_id: &str,
        url: &str,
    ) -> Result<StudentRecord, StoreError> {
        match self.records.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.image_url = Some(url.to_string());
                self.dirty = true;
                Ok(record.clone())
            }
            None => Err(StoreError::Backend {
                message: format!("no record with id {}", record_id),
            }),
        }
    }
}

/// A blob store that writes under a local directory and hands back
/// `file://` URLs.
#[derive(Debug)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn new(root: &str) -> DirBlobStore {
        DirBlobStore {
            root: PathBuf::from(root),
        }
    }
}

impl BlobStore for DirBlobStore {
    fn upload(
        &mut self,
        bytes: &[u8],
        _content_type: &str,
        path: &str,
    ) -> Result<String, BlobError> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BlobError::Upload {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        }
        fs::write(&target, bytes).map_err(|e| BlobError::Upload {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        debug!("DirBlobStore: wrote {} bytes to {}", bytes.len(), target.display());
        Ok(format!("file://{}", target.display()))
    }
}
