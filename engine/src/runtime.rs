use crate::invocation::Invocation;
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Container engines supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    /// Podman container engine
    Podman,
    /// Docker container engine
    Docker,
}

impl ContainerEngine {
    /// Get the executable name for this engine
    pub fn command(&self) -> &'static str {
        match self {
            ContainerEngine::Podman => "podman",
            ContainerEngine::Docker => "docker",
        }
    }

    /// The engine that is tried when this one is missing
    pub fn other(&self) -> ContainerEngine {
        match self {
            ContainerEngine::Podman => ContainerEngine::Docker,
            ContainerEngine::Docker => ContainerEngine::Podman,
        }
    }
}

impl fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for ContainerEngine {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "podman" => Ok(ContainerEngine::Podman),
            "docker" => Ok(ContainerEngine::Docker),
            other => Err(EngineError::UnknownEngine(other.to_string())),
        }
    }
}

/// An engine that was found on the search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedEngine {
    pub engine: ContainerEngine,
    /// Resolved path of the engine executable
    pub executable: PathBuf,
}

impl SelectedEngine {
    pub fn new(engine: ContainerEngine, executable: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            executable: executable.into(),
        }
    }

    /// Start an invocation of the engine executable
    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.executable)
    }
}

/// Picks one of the two engines by looking for their executables.
///
/// Executables are located on the search path without being run, so a
/// stopped Docker daemon or an uninitialised Podman machine still counts as
/// "present".
#[derive(Debug, Clone)]
pub struct EngineSelector {
    preference: ContainerEngine,
    search_path: Option<OsString>,
}

impl Default for EngineSelector {
    fn default() -> Self {
        Self::new(ContainerEngine::Podman)
    }
}

impl EngineSelector {
    pub fn new(preference: ContainerEngine) -> Self {
        Self {
            preference,
            search_path: None,
        }
    }

    /// Search this `PATH`-style list instead of the process `PATH`
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn preference(&self) -> ContainerEngine {
        self.preference
    }

    /// Locate an engine executable, if present
    pub fn locate(&self, engine: ContainerEngine) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(engine.command(), Some(paths), cwd)
            }
            None => which::which(engine.command()),
        };

        match found {
            Ok(path) => {
                debug!(engine = %engine, path = %path.display(), "Found container engine");
                Some(path)
            }
            Err(_) => None,
        }
    }

    /// Select the preferred engine, falling back to the other one
    pub fn select(&self) -> EngineResult<SelectedEngine> {
        for engine in [self.preference, self.preference.other()] {
            if let Some(executable) = self.locate(engine) {
                info!(engine = %engine, path = %executable.display(), "Using container engine");
                return Ok(SelectedEngine::new(engine, executable));
            }
        }

        let searched = match &self.search_path {
            Some(paths) => paths.to_string_lossy().into_owned(),
            None => std::env::var("PATH").unwrap_or_default(),
        };
        Err(EngineError::NoEngineFound { searched })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn fake_executable(dir: &TempDir, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_engine_command() {
        assert_eq!(ContainerEngine::Podman.command(), "podman");
        assert_eq!(ContainerEngine::Docker.command(), "docker");
        assert_eq!(ContainerEngine::Podman.other(), ContainerEngine::Docker);
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!(
            "Docker".parse::<ContainerEngine>().unwrap(),
            ContainerEngine::Docker
        );
        assert_eq!(
            " podman ".parse::<ContainerEngine>().unwrap(),
            ContainerEngine::Podman
        );
        assert!(matches!(
            "containerd".parse::<ContainerEngine>(),
            Err(EngineError::UnknownEngine(_))
        ));
    }

    #[test]
    fn test_select_fails_on_empty_search_path() {
        let dir = TempDir::new().unwrap();
        let selector = EngineSelector::default().with_search_path(dir.path().as_os_str());
        let result = selector.select();
        assert!(matches!(result, Err(EngineError::NoEngineFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_select_prefers_configured_engine_when_both_present() {
        let dir = TempDir::new().unwrap();
        fake_executable(&dir, "podman");
        let docker = fake_executable(&dir, "docker");

        let selector =
            EngineSelector::new(ContainerEngine::Docker).with_search_path(dir.path().as_os_str());
        let selected = selector.select().unwrap();
        assert_eq!(selected.engine, ContainerEngine::Docker);
        assert_eq!(selected.executable, docker);
    }

    #[cfg(unix)]
    #[test]
    fn test_select_falls_back_to_other_engine() {
        let dir = TempDir::new().unwrap();
        fake_executable(&dir, "docker");

        let selector = EngineSelector::default().with_search_path(dir.path().as_os_str());
        let selected = selector.select().unwrap();
        assert_eq!(selected.engine, ContainerEngine::Docker);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("podman"), "not a program").unwrap();

        let selector = EngineSelector::default().with_search_path(dir.path().as_os_str());
        assert!(selector.locate(ContainerEngine::Podman).is_none());
    }
}
