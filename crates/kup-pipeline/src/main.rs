use async_trait::async_trait;
use clap::{value_parser, Arg, ArgAction, Command};
use kup_approval::default_rules;
use kup_pipeline::{PipelineConfig, PipelineOrchestrator, PipelineStatus};
use kup_types::{
    CollaboratorError, DependencyRecord, DependencyStore, EntityKind, FileValidation,
    QualityValidator, StateStore, TechnologyChange,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Dependency mapping loaded from a YAML file: technology name to the list
/// of its dependent files.
struct FileDependencyStore {
    map: HashMap<String, Vec<DependencyRecord>>,
}

impl FileDependencyStore {
    async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let map = serde_yaml::from_str(&raw)?;
        Ok(Self { map })
    }

    fn empty() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

#[async_trait]
impl DependencyStore for FileDependencyStore {
    async fn dependencies_for(
        &self,
        technology: &str,
    ) -> Result<Vec<DependencyRecord>, CollaboratorError> {
        Ok(self.map.get(technology).cloned().unwrap_or_default())
    }
}

/// Stand-in for an external quality framework: every file gets the same
/// assumed score.
struct FixedScoreValidator {
    score: f64,
}

#[async_trait]
impl QualityValidator for FixedScoreValidator {
    async fn validate_file(&self, _path: &Path) -> Result<FileValidation, CollaboratorError> {
        Ok(FileValidation::passing(self.score))
    }
}

/// Append-only JSONL persistence; one line per saved entity.
struct JsonlStateStore {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlStateStore {
    async fn open(path: &Path) -> anyhow::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl StateStore for JsonlStateStore {
    async fn save(
        &self,
        entity: EntityKind,
        record: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        use tokio::io::AsyncWriteExt;
        let line = serde_json::json!({ "entity": entity.as_str(), "record": record });
        let mut file = self.file.lock().await;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| CollaboratorError::Backend(e.to_string()))
    }

    async fn query(
        &self,
        _entity: EntityKind,
        _filter: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>, CollaboratorError> {
        Err(CollaboratorError::Backend(
            "jsonl store is append-only".to_string(),
        ))
    }
}

/// Discards every write.
struct NullStateStore;

#[async_trait]
impl StateStore for NullStateStore {
    async fn save(
        &self,
        _entity: EntityKind,
        _record: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn query(
        &self,
        _entity: EntityKind,
        _filter: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Command::new("kup")
        .version(kup_pipeline::VERSION)
        .about("Knowledge update pipeline")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run one change through the pipeline")
                .arg(
                    Arg::new("change")
                        .long("change")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file describing the technology change"),
                )
                .arg(
                    Arg::new("dependencies")
                        .long("dependencies")
                        .value_parser(value_parser!(PathBuf))
                        .help("YAML map of technology -> dependent file records"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline configuration YAML"),
                )
                .arg(
                    Arg::new("state-log")
                        .long("state-log")
                        .value_parser(value_parser!(PathBuf))
                        .help("Append pipeline records to this JSONL file"),
                )
                .arg(
                    Arg::new("assume-quality")
                        .long("assume-quality")
                        .default_value("85.0")
                        .value_parser(value_parser!(f64))
                        .help("Quality score assumed for every validated file"),
                )
                .arg(
                    Arg::new("approve")
                        .long("approve")
                        .action(ArgAction::SetTrue)
                        .help("Override a pending approval instead of stopping"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Validate a configuration file and print the normalized form")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline configuration YAML"),
                ),
        )
        .subcommand(Command::new("rules").about("Print the built-in approval rule set"));

    match cli.get_matches().subcommand() {
        Some(("run", args)) => {
            let change_path = args.get_one::<PathBuf>("change").unwrap();
            let raw = tokio::fs::read_to_string(change_path).await?;
            let change: TechnologyChange = serde_json::from_str(&raw)?;

            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => PipelineConfig::load(path).await?,
                None => PipelineConfig::default(),
            };
            let deps: Arc<FileDependencyStore> = match args.get_one::<PathBuf>("dependencies") {
                Some(path) => Arc::new(FileDependencyStore::load(path).await?),
                None => Arc::new(FileDependencyStore::empty()),
            };
            let validator = Arc::new(FixedScoreValidator {
                score: *args.get_one::<f64>("assume-quality").unwrap(),
            });
            let store: Arc<dyn StateStore> = match args.get_one::<PathBuf>("state-log") {
                Some(path) => Arc::new(JsonlStateStore::open(path).await?),
                None => Arc::new(NullStateStore),
            };

            let orch =
                Arc::new(PipelineOrchestrator::new(config, deps, validator, store).await?);
            orch.spawn_approval_sweeper();

            let approve = args.get_flag("approve");
            let execution_id = orch.process(change)?;
            let execution = loop {
                if let Some(done) = orch
                    .wait_for_completion(execution_id, Duration::from_millis(200))
                    .await
                {
                    break done;
                }
                let pending = orch
                    .get_execution_status(execution_id)
                    .and_then(|e| e.approval)
                    .filter(|a| a.status.is_decidable());
                if let Some(request) = pending {
                    if approve {
                        orch.emergency_override(
                            request.request_id,
                            "cli",
                            "approved from command line",
                        );
                    } else {
                        println!("{}", serde_json::to_string_pretty(&request)?);
                        eprintln!(
                            "approval required (tier {}); re-run with --approve to override",
                            request.tier.as_str()
                        );
                        orch.cancel_execution(execution_id);
                        orch.wait_for_completion(execution_id, Duration::from_secs(10))
                            .await;
                        std::process::exit(2);
                    }
                }
            };

            println!("{}", serde_json::to_string_pretty(&execution)?);
            std::process::exit(match execution.status {
                PipelineStatus::Completed => 0,
                _ => 1,
            });
        }
        Some(("config", args)) => {
            let config = match args.get_one::<PathBuf>("config") {
                Some(path) => PipelineConfig::load(path).await?,
                None => PipelineConfig::default(),
            };
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Some(("rules", _)) => {
            println!("{}", serde_json::to_string_pretty(&default_rules())?);
        }
        _ => {}
    }
    Ok(())
}
