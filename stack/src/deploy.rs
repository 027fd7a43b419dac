//! The deploy sequence: patch, build, fetch, compose.
//!
//! Steps run strictly in [`StepKind::ALL`] order, each blocking until its
//! external process exits. Which steps run is decided by a [`TagSelection`]
//! in the manner of Ansible tags.

use crate::auxiliary::{self, AuxiliaryError, FetchOutcome};
use crate::config::StackConfig;
use crate::env_file::EnvFile;
use crate::patcher::{PatchError, Patcher};
use crate::preflight::{self, PreflightError};
use engine::{
    build_image, compose_down, compose_up, CommandRunner, ContainerEngine, EngineError,
    EngineSelector, SelectedEngine,
};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("Patching failed: {0}")]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Auxiliary fetch failed: {0}")]
    Auxiliary(#[from] AuxiliaryError),

    #[error("Step '{step}' needs a container engine but none was selected")]
    EngineUnavailable { step: StepKind },
}

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown tag '{0}'. Expected one of: configure, clone, rebuild, compose, takedown")]
pub struct UnknownTag(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    Configure,
    Clone,
    Rebuild,
    Compose,
    Takedown,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Configure => "configure",
            Tag::Clone => "clone",
            Tag::Rebuild => "rebuild",
            Tag::Compose => "compose",
            Tag::Takedown => "takedown",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "configure" => Ok(Tag::Configure),
            "clone" => Ok(Tag::Clone),
            "rebuild" => Ok(Tag::Rebuild),
            "compose" => Ok(Tag::Compose),
            "takedown" => Ok(Tag::Takedown),
            _ => Err(UnknownTag(s.to_string())),
        }
    }
}

/// Which tags run. Without an explicit list everything except `takedown`
/// runs; skipped tags are removed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSelection {
    only: Option<BTreeSet<Tag>>,
    skip: BTreeSet<Tag>,
}

impl TagSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(tags: impl IntoIterator<Item = Tag>) -> Self {
        Self {
            only: Some(tags.into_iter().collect()),
            skip: BTreeSet::new(),
        }
    }

    pub fn skipping(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.skip.extend(tags);
        self
    }

    /// `--tags`/`--skip-tags` as given on the command line; an empty
    /// `--tags` list means the default selection.
    pub fn from_lists(tags: Vec<Tag>, skip: Vec<Tag>) -> Self {
        let selection = if tags.is_empty() {
            Self::all()
        } else {
            Self::only(tags)
        };
        selection.skipping(skip)
    }

    pub fn includes(&self, tag: Tag) -> bool {
        let listed = match &self.only {
            Some(only) => only.contains(&tag),
            None => tag != Tag::Takedown,
        };
        listed && !self.skip.contains(&tag)
    }

    /// True when any selected step drives the container engine
    pub fn needs_engine(&self) -> bool {
        StepKind::ALL
            .iter()
            .any(|step| step.needs_engine() && self.includes(step.tag()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Patch,
    DependencyImage,
    AuxiliaryClone,
    ApplicationImage,
    ComposeUp,
    ComposeDown,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::Patch,
        StepKind::DependencyImage,
        StepKind::AuxiliaryClone,
        StepKind::ApplicationImage,
        StepKind::ComposeUp,
        StepKind::ComposeDown,
    ];

    pub fn tag(&self) -> Tag {
        match self {
            StepKind::Patch => Tag::Configure,
            StepKind::DependencyImage | StepKind::ApplicationImage => Tag::Rebuild,
            StepKind::AuxiliaryClone => Tag::Clone,
            StepKind::ComposeUp => Tag::Compose,
            StepKind::ComposeDown => Tag::Takedown,
        }
    }

    pub fn needs_engine(&self) -> bool {
        !matches!(self, StepKind::Patch | StepKind::AuxiliaryClone)
    }

    fn is_build(&self) -> bool {
        matches!(self, StepKind::DependencyImage | StepKind::ApplicationImage)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Patch => "patch configuration",
            StepKind::DependencyImage => "build dependency image",
            StepKind::AuxiliaryClone => "fetch auxiliary files",
            StepKind::ApplicationImage => "build application image",
            StepKind::ComposeUp => "compose up",
            StepKind::ComposeDown => "compose down",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Skipped,
    FailedIgnored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: StepKind,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub workdir: PathBuf,
    pub engine: Option<ContainerEngine>,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    pub fn outcome(&self, step: StepKind) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|record| record.step == step)
            .map(|record| &record.outcome)
    }

    /// Steps that actually ran, successfully or not
    pub fn executed(&self) -> Vec<StepKind> {
        self.steps
            .iter()
            .filter(|record| record.outcome != StepOutcome::Skipped)
            .map(|record| record.step)
            .collect()
    }

    pub fn ignored_failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|record| matches!(record.outcome, StepOutcome::FailedIgnored { .. }))
            .count()
    }
}

/// One deploy run against a RagFlow working tree
pub struct Deployment<'r> {
    config: StackConfig,
    workdir: PathBuf,
    runner: &'r dyn CommandRunner,
    selector: EngineSelector,
    strict: bool,
}

impl<'r> Deployment<'r> {
    pub fn new(config: StackConfig, workdir: impl Into<PathBuf>, runner: &'r dyn CommandRunner) -> Self {
        let selector = EngineSelector::new(config.engine.prefer);
        let strict = config.deploy.strict_builds;
        Self {
            config,
            workdir: workdir.into(),
            runner,
            selector,
            strict,
        }
    }

    pub fn with_selector(mut self, selector: EngineSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Make image build failures fatal
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn run(&self, selection: &TagSelection) -> DeployResult<RunReport> {
        let checked = preflight::check(&self.config, &self.workdir, selection, &self.selector)?;
        let workdir = checked.workdir;
        let engine = checked.engine;

        info!(
            workdir = %workdir.display(),
            engine = ?engine.as_ref().map(|e| e.engine),
            strict = self.strict,
            "Starting deploy"
        );

        let mut steps = Vec::with_capacity(StepKind::ALL.len());
        for step in StepKind::ALL {
            let outcome = if selection.includes(step.tag()) {
                info!(step = %step, tag = %step.tag(), "Running step");
                self.execute(step, &workdir, engine.as_ref())?
            } else {
                debug!(step = %step, tag = %step.tag(), "Step not selected");
                StepOutcome::Skipped
            };
            steps.push(StepRecord { step, outcome });
        }

        let report = RunReport {
            workdir,
            engine: engine.map(|e| e.engine),
            steps,
        };
        info!(
            executed = report.executed().len(),
            ignored_failures = report.ignored_failures(),
            "Deploy finished"
        );
        Ok(report)
    }

    fn execute(
        &self,
        step: StepKind,
        workdir: &Path,
        engine: Option<&SelectedEngine>,
    ) -> DeployResult<StepOutcome> {
        if step == StepKind::Patch {
            Patcher::new(workdir, self.config.patch_rules()).apply()?;
            return Ok(StepOutcome::Succeeded);
        }

        if step == StepKind::AuxiliaryClone {
            return Ok(match auxiliary::fetch(&self.config.auxiliary, workdir)? {
                FetchOutcome::NotConfigured => StepOutcome::Skipped,
                _ => StepOutcome::Succeeded,
            });
        }

        let engine = engine.ok_or(DeployError::EngineUnavailable { step })?;
        let result = match step {
            StepKind::DependencyImage => {
                build_image(self.runner, engine, &self.config.dependencies_image(workdir))
            }
            StepKind::ApplicationImage => {
                let env = self.env_file(workdir);
                build_image(self.runner, engine, &self.config.application_image(workdir, &env))
            }
            StepKind::ComposeUp => {
                compose_up(self.runner, engine, &self.config.compose_project(workdir))
            }
            StepKind::ComposeDown => {
                compose_down(self.runner, engine, &self.config.compose_project(workdir))
            }
            StepKind::Patch | StepKind::AuxiliaryClone => Ok(()),
        };

        match result {
            Ok(()) => Ok(StepOutcome::Succeeded),
            Err(e) if step.is_build() && !self.strict => {
                warn!(step = %step, error = %e, "Image build failed, continuing");
                Ok(StepOutcome::FailedIgnored {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn env_file(&self, workdir: &Path) -> EnvFile {
        let path = workdir.join(&self.config.project.env_file);
        match EnvFile::load(&path) {
            Ok(env) => env,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read env file, using configured image tag");
                EnvFile::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parsing() {
        assert_eq!("configure".parse::<Tag>().unwrap(), Tag::Configure);
        assert_eq!(" Rebuild ".parse::<Tag>().unwrap(), Tag::Rebuild);
        assert_eq!(
            "deploy".parse::<Tag>(),
            Err(UnknownTag("deploy".to_string()))
        );
    }

    #[test]
    fn test_default_selection_excludes_takedown() {
        let selection = TagSelection::all();
        assert!(selection.includes(Tag::Configure));
        assert!(selection.includes(Tag::Clone));
        assert!(selection.includes(Tag::Rebuild));
        assert!(selection.includes(Tag::Compose));
        assert!(!selection.includes(Tag::Takedown));
    }

    #[test]
    fn test_only_and_skip() {
        let selection = TagSelection::only([Tag::Takedown]);
        assert!(selection.includes(Tag::Takedown));
        assert!(!selection.includes(Tag::Compose));

        let selection = TagSelection::from_lists(vec![], vec![Tag::Rebuild]);
        assert!(!selection.includes(Tag::Rebuild));
        assert!(selection.includes(Tag::Compose));

        let selection = TagSelection::from_lists(vec![Tag::Rebuild, Tag::Compose], vec![Tag::Compose]);
        assert!(selection.includes(Tag::Rebuild));
        assert!(!selection.includes(Tag::Compose));
    }

    #[test]
    fn test_needs_engine() {
        assert!(TagSelection::all().needs_engine());
        assert!(!TagSelection::only([Tag::Configure, Tag::Clone]).needs_engine());
        assert!(TagSelection::only([Tag::Takedown]).needs_engine());
    }

    #[test]
    fn test_step_order_and_tags() {
        let tags: Vec<Tag> = StepKind::ALL.iter().map(StepKind::tag).collect();
        assert_eq!(
            tags,
            vec![
                Tag::Configure,
                Tag::Rebuild,
                Tag::Clone,
                Tag::Rebuild,
                Tag::Compose,
                Tag::Takedown
            ]
        );
    }
}
