use clap::{Parser, Subcommand};
use engine::{EngineSelector, SystemRunner};
use ragflow_api::{CreateDatasetRequest, DatasetApi, RagflowClient};
use stack::deploy::{Deployment, StepOutcome, Tag, TagSelection};
use stack::{
    collect_files, ingest, DocumentDisplay, EnvFile, EnvFileError, FileState, IngestOptions,
    StackConfig,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragstack")]
#[command(about = "Deploy a local RagFlow stack and ingest documents into it")]
struct Cli {
    /// Config file (defaults to ragstack.toml in the working directory)
    #[arg(long, global = true, env = "RAGSTACK_CONFIG")]
    config: Option<PathBuf>,
    /// RagFlow checkout to operate on
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch, build, fetch auxiliary files and start the stack
    Deploy {
        /// Only run steps with these tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<Tag>,
        /// Never run steps with these tags
        #[arg(long, value_delimiter = ',')]
        skip_tags: Vec<Tag>,
        /// Fail the run when an image build fails
        #[arg(long)]
        strict: bool,
    },
    /// Stop and remove the stack's containers
    Takedown,
    /// Print the container engine that would be used
    Engine,
    /// Only patch the configuration files
    Patch,
    /// Upload new and changed files into a dataset
    Ingest {
        /// Directory to import (defaults to ~/LLM_RAG/Logseq)
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        dataset: Option<String>,
        /// File-state ledger location
        #[arg(long)]
        state: Option<PathBuf>,
        /// Upload only; do not start parsing the new documents
        #[arg(long)]
        no_parse: bool,
        #[arg(long, env = "RAGFLOW_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "RAGFLOW_BASE_URL")]
        base_url: Option<String>,
    },
    /// List every document in a dataset
    Documents {
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long, env = "RAGFLOW_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "RAGFLOW_BASE_URL")]
        base_url: Option<String>,
    },
    /// Dataset management
    Dataset {
        #[command(subcommand)]
        action: DatasetCommand,
        #[arg(long, global = true, env = "RAGFLOW_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, global = true, env = "RAGFLOW_BASE_URL")]
        base_url: Option<String>,
    },
    /// Check the RagFlow API is reachable with the configured key
    Health {
        #[arg(long, env = "RAGFLOW_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "RAGFLOW_BASE_URL")]
        base_url: Option<String>,
    },
}

#[derive(Subcommand)]
enum DatasetCommand {
    /// Create a dataset with the default embedding and chunking settings
    Create { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "ragstack failed");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = StackConfig::discover(cli.config.as_deref(), &cli.workdir)?;
    let workdir = cli.workdir;

    match cli.command {
        Commands::Deploy {
            tags,
            skip_tags,
            strict,
        } => {
            let strict = strict || config.deploy.strict_builds;
            deploy(config, &workdir, TagSelection::from_lists(tags, skip_tags), strict)
        }
        Commands::Takedown => {
            let strict = config.deploy.strict_builds;
            deploy(config, &workdir, TagSelection::only([Tag::Takedown]), strict)
        }
        Commands::Patch => {
            let strict = config.deploy.strict_builds;
            deploy(config, &workdir, TagSelection::only([Tag::Configure]), strict)
        }
        Commands::Engine => {
            let selected = EngineSelector::new(config.engine.prefer).select()?;
            println!("{} ({})", selected.engine, selected.executable.display());
            Ok(())
        }
        Commands::Ingest {
            dir,
            dataset,
            state,
            no_parse,
            api_key,
            base_url,
        } => {
            let client = client(&config, &workdir, api_key, base_url)?;
            let dir = dir.unwrap_or_else(|| config.ingest.import_dir());
            let dataset = dataset.unwrap_or_else(|| config.ingest.dataset.clone());
            let state_path = workdir.join(state.unwrap_or_else(|| config.ingest.state_file.clone()));

            let files = collect_files(&dir, &config.ingest.extensions)?;
            let mut state = FileState::load(state_path);
            let options = IngestOptions::default()
                .with_parse(config.ingest.parse_after_upload && !no_parse);
            let report = ingest(
                &client,
                &mut state,
                &CreateDatasetRequest::new(dataset),
                &files,
                options,
            )
            .await?;

            println!(
                "Uploaded {}, skipped {}, failed {} of {} files",
                report.uploaded,
                report.skipped,
                report.failed,
                report.total()
            );
            if report.parsed > 0 {
                println!("Parsing started for {} documents", report.parsed);
            }
            if report.parse_failed {
                println!("! Parse request failed; start parsing from the RagFlow UI");
            }
            Ok(())
        }
        Commands::Documents {
            dataset,
            api_key,
            base_url,
        } => {
            let client = client(&config, &workdir, api_key, base_url)?;
            let name = dataset.unwrap_or_else(|| config.ingest.dataset.clone());
            let Some(dataset) = client.find_dataset(&name).await? else {
                return Err(format!("Dataset '{}' not found", name).into());
            };

            let documents = client
                .list_all_documents(&dataset.id, client.config().page_size)
                .await?;
            if documents.is_empty() {
                println!("No documents found in dataset '{}'.", name);
            }
            for document in &documents {
                print!("{}", DocumentDisplay(document));
            }
            Ok(())
        }
        Commands::Dataset {
            action: DatasetCommand::Create { name },
            api_key,
            base_url,
        } => {
            let client = client(&config, &workdir, api_key, base_url)?;
            let dataset = client.create_dataset(&CreateDatasetRequest::new(name)).await?;
            println!("Created dataset '{}' ({})", dataset.name, dataset.id);
            Ok(())
        }
        Commands::Health { api_key, base_url } => {
            let client = client(&config, &workdir, api_key, base_url)?;
            println!("Performing health check...");
            match client.health_check().await {
                Ok(()) => {
                    println!("✓ RagFlow is running and accessible at {}", client.config().base_url);
                    Ok(())
                }
                Err(e) => {
                    println!("✗ Health check failed: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}

fn deploy(
    config: StackConfig,
    workdir: &Path,
    selection: TagSelection,
    strict: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = SystemRunner;
    let report = Deployment::new(config, workdir, &runner)
        .with_strict(strict)
        .run(&selection)?;

    for record in &report.steps {
        match &record.outcome {
            StepOutcome::Succeeded => println!("✓ {}", record.step),
            StepOutcome::Skipped => {}
            StepOutcome::FailedIgnored { reason } => println!("! {} (ignored): {}", record.step, reason),
        }
    }
    info!(workdir = %report.workdir.display(), "Done");
    Ok(())
}

fn client(
    config: &StackConfig,
    workdir: &Path,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Result<RagflowClient, Box<dyn std::error::Error>> {
    let env_path = workdir.join(config.ingest.secrets_file(&config.project));
    let env = match EnvFile::load_secrets(&env_path) {
        Ok(env) => env,
        Err(e @ EnvFileError::Io { .. }) => {
            warn!(path = %env_path.display(), error = %e, "Env file not readable");
            EnvFile::default()
        }
        Err(e) => return Err(e.into()),
    };

    let ragflow = config.ragflow_config(&env, api_key, base_url)?;
    Ok(RagflowClient::new(ragflow)?)
}
