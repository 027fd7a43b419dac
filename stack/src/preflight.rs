//! Checks that must pass before anything on disk is touched.

use crate::config::StackConfig;
use crate::deploy::{Tag, TagSelection};
use crate::patcher::Patcher;
use engine::{EngineError, EngineSelector, SelectedEngine};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("Unsupported operating system '{actual}', expected '{expected}'")]
    UnsupportedOs { expected: String, actual: String },

    #[error("Working directory {path} is not accessible: {source}")]
    WorkdirUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Must be run from a directory named '{expected}', not '{actual}'")]
    WrongDirectory { expected: String, actual: String },

    #[error(transparent)]
    NoEngine(#[from] EngineError),

    #[error("Patch target does not exist: {path}")]
    MissingPatchTarget { path: String },

    #[error("Compose file {path} does not exist and no selected clone step provides it")]
    MissingComposeFile { path: String },
}

pub type PreflightResult<T> = Result<T, PreflightError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checked {
    /// Canonical working directory
    pub workdir: PathBuf,
    /// Present only when a selected step drives the engine
    pub engine: Option<SelectedEngine>,
}

pub fn check(
    config: &StackConfig,
    workdir: &Path,
    selection: &TagSelection,
    selector: &EngineSelector,
) -> PreflightResult<Checked> {
    if let Some(expected) = &config.project.require_os {
        check_os(expected, std::env::consts::OS)?;
    }

    let workdir = check_workdir(workdir, &config.project.expected_dir_name)?;

    let engine = if selection.needs_engine() {
        Some(selector.select()?)
    } else {
        debug!("No selected step needs a container engine");
        None
    };

    if selection.includes(Tag::Configure) {
        let patcher = Patcher::new(&workdir, config.patch_rules());
        for target in patcher.targets() {
            if !target.is_file() {
                return Err(PreflightError::MissingPatchTarget {
                    path: target.display().to_string(),
                });
            }
        }
    }

    if selection.includes(Tag::Compose) || selection.includes(Tag::Takedown) {
        check_compose_file(config, &workdir, selection)?;
    }

    info!(workdir = %workdir.display(), "Preflight checks passed");
    Ok(Checked { workdir, engine })
}

/// The compose file must exist already, unless a selected clone step with a
/// configured repository copies it into place.
pub fn check_compose_file(
    config: &StackConfig,
    workdir: &Path,
    selection: &TagSelection,
) -> PreflightResult<()> {
    let compose_file = workdir.join(&config.compose.file);
    if compose_file.is_file() {
        return Ok(());
    }

    let provided_by_clone = selection.includes(Tag::Clone)
        && config.auxiliary.repository.is_some()
        && config
            .auxiliary
            .copies
            .iter()
            .any(|copy| workdir.join(&copy.to) == compose_file);
    if provided_by_clone {
        debug!(path = %compose_file.display(), "Compose file will come from the auxiliary repository");
        return Ok(());
    }

    Err(PreflightError::MissingComposeFile {
        path: compose_file.display().to_string(),
    })
}

pub fn check_os(expected: &str, actual: &str) -> PreflightResult<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(PreflightError::UnsupportedOs {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Canonicalize `workdir` and require its base name to be `expected`
pub fn check_workdir(workdir: &Path, expected: &str) -> PreflightResult<PathBuf> {
    let canonical = workdir
        .canonicalize()
        .map_err(|source| PreflightError::WorkdirUnavailable {
            path: workdir.display().to_string(),
            source,
        })?;

    let actual = canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if actual != expected {
        return Err(PreflightError::WrongDirectory {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auxiliary::AuxiliaryConfig;
    use tempfile::TempDir;

    fn ragflow_dir(root: &TempDir) -> PathBuf {
        let ragflow = root.path().join("ragflow");
        std::fs::create_dir(&ragflow).unwrap();
        ragflow
    }

    #[test]
    fn test_check_os() {
        assert!(check_os("macos", "macos").is_ok());
        assert!(check_os("MacOS", "macos").is_ok());
        assert!(matches!(
            check_os("macos", "linux"),
            Err(PreflightError::UnsupportedOs { .. })
        ));
    }

    #[test]
    fn test_check_workdir_name() {
        let root = TempDir::new().unwrap();
        let ragflow = root.path().join("ragflow");
        std::fs::create_dir(&ragflow).unwrap();

        let canonical = check_workdir(&ragflow, "ragflow").unwrap();
        assert!(canonical.is_absolute());
        assert!(canonical.ends_with("ragflow"));

        // a relative path that resolves to the right directory is fine
        let dotted = ragflow.join("docker").join("..");
        std::fs::create_dir(ragflow.join("docker")).unwrap();
        assert!(check_workdir(&dotted, "ragflow").is_ok());

        match check_workdir(root.path(), "ragflow") {
            Err(PreflightError::WrongDirectory { expected, .. }) => assert_eq!(expected, "ragflow"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_workdir() {
        let root = TempDir::new().unwrap();
        let result = check_workdir(&root.path().join("ragflow"), "ragflow");
        assert!(matches!(result, Err(PreflightError::WorkdirUnavailable { .. })));
    }

    #[test]
    fn test_missing_patch_target() {
        let root = TempDir::new().unwrap();
        let ragflow = root.path().join("ragflow");
        std::fs::create_dir(&ragflow).unwrap();
        std::fs::write(ragflow.join("pyproject.toml"), "").unwrap();

        let config = StackConfig::default().with_require_os(None);
        let result = check(
            &config,
            &ragflow,
            &TagSelection::only([Tag::Configure]),
            &EngineSelector::default(),
        );
        match result {
            Err(PreflightError::MissingPatchTarget { path }) => assert!(path.ends_with(".env")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_compose_file() {
        let root = TempDir::new().unwrap();
        let ragflow = ragflow_dir(&root);
        let config = StackConfig::default();

        for selection in [TagSelection::all(), TagSelection::only([Tag::Takedown])] {
            match check_compose_file(&config, &ragflow, &selection) {
                Err(PreflightError::MissingComposeFile { path }) => {
                    assert!(path.ends_with("docker-compose-macos.yml"))
                }
                other => panic!("unexpected: {:?}", other),
            }
        }

        std::fs::create_dir(ragflow.join("docker")).unwrap();
        std::fs::write(ragflow.join("docker/docker-compose-macos.yml"), "services: {}\n").unwrap();
        assert!(check_compose_file(&config, &ragflow, &TagSelection::all()).is_ok());
    }

    #[test]
    fn test_compose_file_from_clone_step() {
        let root = TempDir::new().unwrap();
        let ragflow = ragflow_dir(&root);
        let config = StackConfig::default().with_auxiliary(AuxiliaryConfig {
            repository: Some("https://github.com/example/ragflow-mac-assets.git".to_string()),
            ..AuxiliaryConfig::default()
        });

        assert!(check_compose_file(&config, &ragflow, &TagSelection::all()).is_ok());

        // skipping the clone leaves nothing to provide it
        let selection = TagSelection::all().skipping([Tag::Clone]);
        assert!(matches!(
            check_compose_file(&config, &ragflow, &selection),
            Err(PreflightError::MissingComposeFile { .. })
        ));
    }

    #[test]
    fn test_compose_check_only_for_compose_steps() {
        let root = TempDir::new().unwrap();
        let ragflow = ragflow_dir(&root);
        std::fs::create_dir(ragflow.join("docker")).unwrap();
        std::fs::write(ragflow.join("docker/.env"), "").unwrap();
        std::fs::write(ragflow.join("pyproject.toml"), "").unwrap();

        let config = StackConfig::default().with_require_os(None);
        let result = check(
            &config,
            &ragflow,
            &TagSelection::only([Tag::Configure]),
            &EngineSelector::default(),
        );
        assert!(result.is_ok());
    }
}
