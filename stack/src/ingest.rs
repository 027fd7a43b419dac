//! Uploading a directory of notes into a RagFlow dataset.

use crate::file_state::{FileState, FileStateError};
use glob::{glob, Pattern, PatternError};
use ragflow_api::{CreateDatasetRequest, DatasetApi, Document, RagflowError};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_EXTENSIONS: [&str; 5] = [".md", ".docx", ".pdf", ".txt", ".pptx"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Import directory {path} is not accessible: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid walk pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload of {file} returned no document")]
    EmptyUpload { file: String },

    #[error(transparent)]
    Api(#[from] RagflowError),

    #[error(transparent)]
    State(#[from] FileStateError),
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Ask the server to chunk the documents uploaded by this run
    pub parse: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { parse: true }
    }
}

impl IngestOptions {
    pub fn with_parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Documents handed to the parse endpoint
    pub parsed: usize,
    /// The parse request was rejected; uploads are still recorded
    pub parse_failed: bool,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.uploaded + self.skipped + self.failed
    }
}

/// Regular files under `dir` whose names end with one of `extensions`,
/// as absolute sorted paths
pub fn collect_files(dir: &Path, extensions: &[String]) -> IngestResult<Vec<PathBuf>> {
    let root = dir.canonicalize().map_err(|source| IngestError::Directory {
        path: dir.display().to_string(),
        source,
    })?;

    let pattern = format!("{}/**/*", Pattern::escape(&root.to_string_lossy()));
    let mut files = Vec::new();
    for entry in glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            files.push(path);
        }
    }

    files.sort();
    debug!(dir = %root.display(), count = files.len(), "Collected files");
    Ok(files)
}

/// Ensure the dataset exists, then upload every new or changed file.
/// A failed file is logged and counted; the remaining files still run.
/// With `options.parse`, the documents uploaded by this run are queued for
/// parsing in one request at the end.
pub async fn ingest<A: DatasetApi + ?Sized>(
    api: &A,
    state: &mut FileState,
    dataset: &CreateDatasetRequest,
    files: &[PathBuf],
    options: IngestOptions,
) -> IngestResult<IngestReport> {
    let dataset = api.ensure_dataset(dataset).await?;
    info!(dataset = %dataset.name, id = %dataset.id, files = files.len(), "Ingesting");

    let mut report = IngestReport::default();
    let mut uploaded_ids = Vec::new();
    for file in files {
        if !state.should_upload(file) {
            report.skipped += 1;
            continue;
        }

        match upload_file(api, state, &dataset.id, file).await {
            Ok(document_id) => {
                info!(file = %file.display(), %document_id, "Uploaded");
                report.uploaded += 1;
                uploaded_ids.push(document_id);
            }
            Err(e) => {
                error!(file = %file.display(), error = %e, "Upload failed");
                report.failed += 1;
            }
        }
    }

    if options.parse && !uploaded_ids.is_empty() {
        match api.parse_documents(&dataset.id, &uploaded_ids).await {
            Ok(()) => report.parsed = uploaded_ids.len(),
            Err(e) => {
                error!(dataset_id = %dataset.id, error = %e, "Parse request failed");
                report.parse_failed = true;
            }
        }
    }

    info!(
        uploaded = report.uploaded,
        skipped = report.skipped,
        failed = report.failed,
        parsed = report.parsed,
        "Ingest finished"
    );
    Ok(report)
}

async fn upload_file<A: DatasetApi + ?Sized>(
    api: &A,
    state: &mut FileState,
    dataset_id: &str,
    file: &Path,
) -> IngestResult<String> {
    let content = tokio::fs::read(file).await.map_err(|source| IngestError::Read {
        path: file.display().to_string(),
        source,
    })?;
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let documents = api.upload_document(dataset_id, &name, content).await?;
    let document = documents.into_iter().next().ok_or_else(|| IngestError::EmptyUpload {
        file: file.display().to_string(),
    })?;

    state.record(file, document.id.clone(), None)?;
    Ok(document.id)
}

/// Human-readable block for one document
pub struct DocumentDisplay<'a>(pub &'a Document);

impl fmt::Display for DocumentDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let document = self.0;
        writeln!(f, "--------------------------------------------------")?;
        writeln!(f, "Document ID: {}", document.id)?;
        writeln!(f, "File Name: {}", document.name)?;
        writeln!(f, "Created At: {}", document.created_at.as_deref().unwrap_or("-"))?;
        writeln!(f, "Updated At: {}", document.updated_at.as_deref().unwrap_or("-"))?;

        if document.metadata.is_empty() {
            return writeln!(f, "No metadata found for this document.");
        }
        writeln!(f, "Metadata:")?;
        for (key, value) in &document.metadata {
            match value {
                serde_json::Value::String(s) => writeln!(f, "  {}: {}", key, s)?,
                other => writeln!(f, "  {}: {}", key, other)?,
            }
        }
        Ok(())
    }
}

pub fn render_document(document: &Document) -> String {
    DocumentDisplay(document).to_string()
}
