pub mod auxiliary;
pub mod config;
pub mod deploy;
pub mod env_file;
pub mod file_state;
pub mod ingest;
pub mod patcher;
pub mod preflight;

pub use auxiliary::{AuxiliaryConfig, AuxiliaryError, FetchOutcome, FileCopy};
pub use config::{ConfigError, StackConfig};
pub use deploy::{
    DeployError, DeployResult, Deployment, RunReport, StepKind, StepOutcome, StepRecord, Tag,
    TagSelection,
};
pub use env_file::{EnvFile, EnvFileError};
pub use file_state::{FileRecord, FileState, FileStateError};
pub use ingest::{
    collect_files, ingest, render_document, DocumentDisplay, IngestError, IngestOptions, IngestReport,
};
pub use patcher::{PatchError, PatchOutcome, PatchReport, PatchRule, Patcher};
pub use preflight::PreflightError;
