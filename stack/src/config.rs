//! `ragstack.toml` configuration.
//!
//! Every section is optional; a missing file yields the defaults, which
//! describe a RagFlow checkout on macOS.

use crate::auxiliary::AuxiliaryConfig;
use crate::env_file::EnvFile;
use crate::patcher::{default_rules, PatchRule};
use engine::{ComposeProject, ContainerEngine, ImageBuildConfig};
use ragflow_api::RagflowConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "ragstack.toml";
pub const API_KEY_VAR: &str = "RAGFLOW_API_KEY";
pub const BASE_URL_VAR: &str = "RAGFLOW_BASE_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No RagFlow API key: set RAGFLOW_API_KEY or pass --api-key")]
    MissingApiKey,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Required base name of the working directory
    pub expected_dir_name: String,
    /// Required `std::env::consts::OS` value; unset disables the check
    pub require_os: Option<String>,
    pub env_file: PathBuf,
    pub manifest: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            expected_dir_name: "ragflow".to_string(),
            require_os: Some("macos".to_string()),
            env_file: PathBuf::from("docker/.env"),
            manifest: PathBuf::from("pyproject.toml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub prefer: ContainerEngine,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefer: ContainerEngine::Podman,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub dependencies: ImageBuildConfig,
    pub application: ImageBuildConfig,
    /// Env file key whose value, when present, overrides the application tag
    pub application_tag_var: Option<String>,
    /// Env file keys forwarded as application build args when set there
    pub build_arg_vars: Vec<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            dependencies: ImageBuildConfig::new("Dockerfile.deps", "infiniflow/ragflow_deps:latest"),
            application: ImageBuildConfig::new("Dockerfile", "infiniflow/ragflow:nightly")
                .with_build_arg("LIGHTEN", "0"),
            application_tag_var: Some("RAGFLOW_IMAGE".to_string()),
            build_arg_vars: vec!["LIGHTEN".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub file: PathBuf,
    pub project_name: Option<String>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("docker/docker-compose-macos.yml"),
            project_name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Abort the run when an image build fails instead of continuing
    pub strict_builds: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub base_url: Option<String>,
    pub dataset: String,
    /// Defaults to `$HOME/LLM_RAG/Logseq`
    pub import_dir: Option<PathBuf>,
    pub extensions: Vec<String>,
    pub state_file: PathBuf,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Start parsing the documents uploaded by a run
    pub parse_after_upload: bool,
    /// Env file holding the API key, possibly vault encrypted. Falls back to
    /// `project.env_file`.
    pub secrets_file: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            dataset: "logseq_dataset".to_string(),
            import_dir: None,
            extensions: crate::ingest::DEFAULT_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            state_file: PathBuf::from("file_state.json"),
            page_size: ragflow_api::config::DEFAULT_PAGE_SIZE,
            timeout_secs: 60,
            parse_after_upload: true,
            secrets_file: None,
        }
    }
}

impl IngestConfig {
    pub fn secrets_file<'a>(&'a self, project: &'a ProjectConfig) -> &'a Path {
        self.secrets_file.as_deref().unwrap_or(&project.env_file)
    }

    pub fn import_dir(&self) -> PathBuf {
        match &self.import_dir {
            Some(dir) => dir.clone(),
            None => {
                let home = std::env::var_os("HOME").unwrap_or_default();
                PathBuf::from(home).join("LLM_RAG").join("Logseq")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub project: ProjectConfig,
    pub engine: EngineConfig,
    pub images: ImagesConfig,
    pub auxiliary: AuxiliaryConfig,
    pub compose: ComposeConfig,
    pub deploy: DeployConfig,
    /// Replaces the stock rule set when non-empty
    pub patches: Vec<PatchRule>,
    pub ingest: IngestConfig,
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: StackConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `explicit` if given, else `ragstack.toml` in `workdir` if it
    /// exists, else the defaults.
    pub fn discover(explicit: Option<&Path>, workdir: &Path) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidate = workdir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Loading config");
            Self::load(candidate)
        } else {
            debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn with_require_os(mut self, os: Option<&str>) -> Self {
        self.project.require_os = os.map(str::to_string);
        self
    }

    pub fn with_auxiliary(mut self, auxiliary: AuxiliaryConfig) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_strict_builds(mut self, strict: bool) -> Self {
        self.deploy.strict_builds = strict;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.project.expected_dir_name.trim().is_empty() {
            return Err("project.expected_dir_name cannot be empty".to_string());
        }

        if self.images.dependencies.tag.trim().is_empty()
            || self.images.application.tag.trim().is_empty()
        {
            return Err("Image tags cannot be empty".to_string());
        }

        if self.ingest.dataset.trim().is_empty() {
            return Err("ingest.dataset cannot be empty".to_string());
        }

        if self.ingest.page_size == 0 {
            return Err("ingest.page_size must be greater than 0".to_string());
        }

        if let Some(url) = &self.ingest.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("ingest.base_url must start with http:// or https://".to_string());
            }
        }

        Ok(())
    }

    /// Configured patch rules, or the stock ones
    pub fn patch_rules(&self) -> Vec<PatchRule> {
        if self.patches.is_empty() {
            default_rules(&self.project.manifest, &self.project.env_file)
        } else {
            self.patches.clone()
        }
    }

    pub fn compose_project(&self, workdir: &Path) -> ComposeProject {
        let mut project = ComposeProject::new(workdir, &self.compose.file)
            .with_env_file(&self.project.env_file);
        if let Some(name) = &self.compose.project_name {
            project = project.with_project_name(name);
        }
        project
    }

    /// Build config with its context resolved against `workdir`
    pub fn dependencies_image(&self, workdir: &Path) -> ImageBuildConfig {
        let image = &self.images.dependencies;
        image.clone().with_context(workdir.join(&image.context))
    }

    /// Application build config. The tag and the `build_arg_vars` build
    /// args come from the env file when set there.
    pub fn application_image(&self, workdir: &Path, env: &EnvFile) -> ImageBuildConfig {
        let mut image = self.images.application.clone();
        image.context = workdir.join(&image.context);

        for key in &self.images.build_arg_vars {
            let Some(value) = env.get(key) else {
                continue;
            };
            match image.build_args.iter_mut().find(|(k, _)| k == key) {
                Some(arg) => arg.1 = value.to_string(),
                None => image.build_args.push((key.clone(), value.to_string())),
            }
        }

        if let Some(tag) = self
            .images
            .application_tag_var
            .as_deref()
            .and_then(|key| env.get(key))
            .filter(|tag| !tag.is_empty())
        {
            image.tag = tag.to_string();
        }
        image
    }

    /// Client settings. Explicit values win, then the process environment,
    /// then this config, then the env file (`RAGFLOW_API_KEY`,
    /// `SVR_HTTP_PORT`).
    pub fn ragflow_config(
        &self,
        env: &EnvFile,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> ConfigResult<RagflowConfig> {
        let api_key = api_key
            .or_else(|| std::env::var(API_KEY_VAR).ok())
            .or_else(|| env.get(API_KEY_VAR).map(str::to_string))
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let base_url = base_url
            .or_else(|| std::env::var(BASE_URL_VAR).ok())
            .or_else(|| self.ingest.base_url.clone())
            .or_else(|| {
                env.get("SVR_HTTP_PORT")
                    .map(|port| format!("http://localhost:{}", port))
            })
            .unwrap_or_else(|| RagflowConfig::default().base_url);

        let config = RagflowConfig::default()
            .with_base_url(base_url)
            .with_api_key(api_key)
            .with_page_size(self.ingest.page_size)
            .with_timeout(Duration::from_secs(self.ingest.timeout_secs));
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}
