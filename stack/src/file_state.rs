//! Local ledger of uploaded files.
//!
//! Keyed by the file's path, each entry remembers the content digest at the
//! time of upload and the document id RagFlow assigned. Every mutation is
//! written straight back to disk as pretty-printed JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum FileStateError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type FileStateResult<T> = Result<T, FileStateError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub basename: String,
    pub sha256: String,
    pub document_id: String,
    #[serde(default)]
    pub cosine_similarity: Option<f64>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileState {
    path: PathBuf,
    files: BTreeMap<String, FileRecord>,
}

impl FileState {
    /// Load the ledger at `path`. A missing file gives an empty ledger, and
    /// so does an unreadable or corrupt one (after logging the problem).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let files = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(files) => files,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Error loading file state, starting empty");
                    BTreeMap::new()
                }
            }
        } else {
            debug!(path = %path.display(), "No file state yet");
            BTreeMap::new()
        };

        Self { path, files }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, file: &Path) -> Option<&FileRecord> {
        self.files.get(&key(file))
    }

    pub fn document_id(&self, file: &Path) -> Option<&str> {
        self.get(file).map(|record| record.document_id.as_str())
    }

    /// Unknown files, changed files and files that cannot be hashed all
    /// need uploading.
    pub fn should_upload(&self, file: &Path) -> bool {
        let digest = match digest(file) {
            Ok(digest) => digest,
            Err(e) => {
                error!(file = %file.display(), error = %e, "Could not hash file, assuming upload is needed");
                return true;
            }
        };

        match self.get(file) {
            Some(record) if record.sha256 == digest => {
                info!(file = %file.display(), "Unchanged since last upload, skipping");
                false
            }
            Some(_) => {
                info!(file = %file.display(), "Changed since last upload");
                true
            }
            None => {
                info!(file = %file.display(), "New file");
                true
            }
        }
    }

    /// Store the file's current digest with its document id and save
    pub fn record(
        &mut self,
        file: &Path,
        document_id: impl Into<String>,
        cosine_similarity: Option<f64>,
    ) -> FileStateResult<()> {
        let sha256 = digest(file)?;
        let basename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let document_id = document_id.into();

        info!(file = %file.display(), %sha256, %document_id, "Recording upload");
        self.files.insert(
            key(file),
            FileRecord {
                basename,
                sha256,
                document_id,
                cosine_similarity,
                uploaded_at: Some(Utc::now()),
            },
        );
        self.save()
    }

    /// Point a known file at a new document id; unknown files are ignored
    pub fn update_document_id(&mut self, file: &Path, document_id: impl Into<String>) -> FileStateResult<()> {
        match self.files.get_mut(&key(file)) {
            Some(record) => {
                record.document_id = document_id.into();
                info!(file = %file.display(), document_id = %record.document_id, "Updated document id");
                self.save()
            }
            None => {
                warn!(file = %file.display(), "File not in state, cannot update document id");
                Ok(())
            }
        }
    }

    pub fn save(&self) -> FileStateResult<()> {
        let write_error = |source| FileStateError::Write {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let json = serde_json::to_string_pretty(&self.files)?;
        std::fs::write(&self.path, json).map_err(write_error)
    }
}

/// Hex SHA-256 of the file's bytes
pub fn digest(file: &Path) -> FileStateResult<String> {
    let read_error = |source| FileStateError::Read {
        path: file.display().to_string(),
        source,
    };

    let mut reader = File::open(file).map_err(read_error)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher).map_err(read_error)?;
    Ok(hex::encode(hasher.finalize()))
}

fn key(file: &Path) -> String {
    file.to_string_lossy().into_owned()
}
