//! Container engine utilities for ragstack
//!
//! This crate decides which container engine (Podman or Docker) drives a run,
//! and turns image builds and compose up/down requests into process
//! invocations executed through a [`CommandRunner`].

pub mod compose;
pub mod image;
pub mod invocation;
pub mod runtime;

use thiserror::Error;

pub use compose::{compose_down, compose_up, ComposeAction, ComposeProject};
pub use image::{build_image, ImageBuildConfig};
pub use invocation::{CommandRunner, Invocation, SystemRunner};
pub use runtime::{ContainerEngine, EngineSelector, SelectedEngine};

/// Errors related to container engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Neither engine executable is on the search path
    #[error("No container engine found (searched for podman and docker in {searched}). Install Docker or Podman.")]
    NoEngineFound { searched: String },

    /// Unknown engine name in configuration
    #[error("Unknown container engine '{0}'. Expected 'podman' or 'docker'.")]
    UnknownEngine(String),

    /// The process could not be started at all
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully
    #[error("Command failed with {status}: {command}")]
    CommandFailed { command: String, status: String },

    /// Image build failed
    #[error("Failed to build image '{tag}': {reason}")]
    ImageBuildFailed { tag: String, reason: String },

    /// Compose invocation failed
    #[error("Compose {action} failed for '{file}': {reason}")]
    ComposeFailed {
        action: ComposeAction,
        file: String,
        reason: String,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
