//! Image builds through the selected engine.

use crate::invocation::{CommandRunner, Invocation};
use crate::runtime::SelectedEngine;
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Configuration for building a container image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBuildConfig {
    /// Dockerfile, relative to the build context
    pub dockerfile: PathBuf,
    /// Tag applied to the built image
    pub tag: String,
    /// Build context directory
    pub context: PathBuf,
    /// `--build-arg` pairs, in order
    pub build_args: Vec<(String, String)>,
    /// Optional `--platform` value
    pub platform: Option<String>,
}

impl Default for ImageBuildConfig {
    fn default() -> Self {
        Self {
            dockerfile: PathBuf::from("Dockerfile"),
            tag: "infiniflow/ragflow:nightly".to_string(),
            context: PathBuf::from("."),
            build_args: Vec::new(),
            platform: None,
        }
    }
}

impl ImageBuildConfig {
    pub fn new(dockerfile: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            dockerfile: dockerfile.into(),
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<PathBuf>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.push((key.into(), value.into()));
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// `<engine> build [--platform p] [--build-arg k=v]... -f <dockerfile> -t <tag> .`
    ///
    /// The process runs inside the context directory, so the trailing context
    /// argument is always `.`.
    pub fn invocation(&self, engine: &SelectedEngine) -> Invocation {
        let mut invocation = engine.invocation().arg("build");

        if let Some(platform) = &self.platform {
            invocation = invocation.args(["--platform", platform.as_str()]);
        }
        for (key, value) in &self.build_args {
            invocation = invocation.arg("--build-arg").arg(format!("{}={}", key, value));
        }

        invocation
            .arg("-f")
            .arg(self.dockerfile.display().to_string())
            .args(["-t", self.tag.as_str()])
            .arg(".")
            .current_dir(&self.context)
    }
}

/// Build an image, blocking until the engine exits
pub fn build_image(
    runner: &dyn CommandRunner,
    engine: &SelectedEngine,
    config: &ImageBuildConfig,
) -> EngineResult<()> {
    info!(
        tag = %config.tag,
        dockerfile = %config.dockerfile.display(),
        engine = %engine.engine,
        "Building image"
    );

    runner
        .run(&config.invocation(engine))
        .map_err(|e| EngineError::ImageBuildFailed {
            tag: config.tag.clone(),
            reason: e.to_string(),
        })
}
