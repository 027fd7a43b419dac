//! Fetching files from the auxiliary repository.
//!
//! The repository is cloned once with libgit2; an existing checkout at the
//! destination is reused as is. Configured files are then copied verbatim
//! into the RagFlow working tree.

use git2::build::RepoBuilder;
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AuxiliaryError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Auxiliary file not found: {path}")]
    MissingSource { path: String },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
}

pub type AuxiliaryResult<T> = Result<T, AuxiliaryError>;

/// A file taken from the auxiliary checkout (`from`) into the working tree (`to`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopy {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl FileCopy {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxiliaryConfig {
    /// Clone URL or local path; nothing is fetched when unset
    pub repository: Option<String>,
    pub branch: Option<String>,
    /// Checkout location, relative to the working directory
    pub destination: PathBuf,
    pub copies: Vec<FileCopy>,
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            repository: None,
            branch: None,
            destination: PathBuf::from(".ragstack/auxiliary"),
            copies: vec![
                FileCopy::new("deploy/docker-compose.yml", "docker/docker-compose-macos.yml"),
                FileCopy::new(
                    "deploy/service_conf.yaml.template",
                    "docker/service_conf.yaml.template",
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cloned { copied: usize },
    AlreadyPresent { copied: usize },
    NotConfigured,
}

/// Clone (if needed) and copy the configured files into `workdir`
pub fn fetch(config: &AuxiliaryConfig, workdir: &Path) -> AuxiliaryResult<FetchOutcome> {
    let Some(url) = config.repository.as_deref() else {
        info!("No auxiliary repository configured, skipping fetch");
        return Ok(FetchOutcome::NotConfigured);
    };

    let destination = workdir.join(&config.destination);
    let cloned = match Repository::open(&destination) {
        Ok(_) => {
            info!(destination = %destination.display(), "Auxiliary repository already present");
            false
        }
        Err(_) => {
            info!(url, destination = %destination.display(), "Cloning auxiliary repository");
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).map_err(|source| AuxiliaryError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
            let mut builder = RepoBuilder::new();
            if let Some(branch) = &config.branch {
                builder.branch(branch);
            }
            builder.clone(url, &destination)?;
            true
        }
    };

    let copied = copy_files(&destination, workdir, &config.copies)?;
    Ok(if cloned {
        FetchOutcome::Cloned { copied }
    } else {
        FetchOutcome::AlreadyPresent { copied }
    })
}

/// Copy files byte for byte, creating parent directories. Every source is
/// checked before the first copy.
pub fn copy_files(source_root: &Path, target_root: &Path, copies: &[FileCopy]) -> AuxiliaryResult<usize> {
    for copy in copies {
        let from = source_root.join(&copy.from);
        if !from.is_file() {
            return Err(AuxiliaryError::MissingSource {
                path: from.display().to_string(),
            });
        }
    }

    for copy in copies {
        let from = source_root.join(&copy.from);
        let to = target_root.join(&copy.to);
        let copy_error = |source| AuxiliaryError::Copy {
            from: from.display().to_string(),
            to: to.display().to_string(),
            source,
        };

        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(copy_error)?;
        }
        std::fs::copy(&from, &to).map_err(copy_error)?;
        debug!(from = %from.display(), to = %to.display(), "Copied auxiliary file");
    }

    Ok(copies.len())
}
