use crate::invocation::{CommandRunner, Invocation};
use crate::runtime::SelectedEngine;
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeAction {
    /// `up -d`
    Up,
    /// `down`
    Down,
}

impl fmt::Display for ComposeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeAction::Up => write!(f, "up"),
            ComposeAction::Down => write!(f, "down"),
        }
    }
}

/// A compose file together with the env file it is rendered with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeProject {
    pub compose_file: PathBuf,
    pub env_file: Option<PathBuf>,
    /// Directory the compose command runs in
    pub project_dir: PathBuf,
    #[serde(default)]
    pub project_name: Option<String>,
}

impl ComposeProject {
    pub fn new(project_dir: impl Into<PathBuf>, compose_file: impl Into<PathBuf>) -> Self {
        Self {
            compose_file: compose_file.into(),
            env_file: None,
            project_dir: project_dir.into(),
            project_name: None,
        }
    }

    pub fn with_env_file(mut self, env_file: impl Into<PathBuf>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Both engines accept the `compose` subcommand (Podman delegates it to
    /// its configured compose provider).
    pub fn invocation(&self, engine: &SelectedEngine, action: ComposeAction) -> Invocation {
        let mut invocation = engine
            .invocation()
            .arg("compose")
            .arg("-f")
            .arg(self.compose_file.display().to_string());

        if let Some(env_file) = &self.env_file {
            invocation = invocation
                .arg("--env-file")
                .arg(env_file.display().to_string());
        }
        if let Some(name) = &self.project_name {
            invocation = invocation.args(["-p", name.as_str()]);
        }

        let invocation = match action {
            ComposeAction::Up => invocation.args(["up", "-d"]),
            ComposeAction::Down => invocation.arg("down"),
        };
        invocation.current_dir(&self.project_dir)
    }
}

fn run_compose(
    runner: &dyn CommandRunner,
    engine: &SelectedEngine,
    project: &ComposeProject,
    action: ComposeAction,
) -> EngineResult<()> {
    info!(
        action = %action,
        file = %project.compose_file.display(),
        engine = %engine.engine,
        "Running compose"
    );

    runner
        .run(&project.invocation(engine, action))
        .map_err(|e| EngineError::ComposeFailed {
            action,
            file: project.compose_file.display().to_string(),
            reason: e.to_string(),
        })
}

/// Bring the stack up in detached mode
pub fn compose_up(
    runner: &dyn CommandRunner,
    engine: &SelectedEngine,
    project: &ComposeProject,
) -> EngineResult<()> {
    run_compose(runner, engine, project, ComposeAction::Up)
}

/// Stop and remove the stack's containers
pub fn compose_down(
    runner: &dyn CommandRunner,
    engine: &SelectedEngine,
    project: &ComposeProject,
) -> EngineResult<()> {
    run_compose(runner, engine, project, ComposeAction::Down)
}
