//! Equimetrics - horse weight estimation and ration planning
//!
//! Command-line front end over the estimation pipeline. Results are printed
//! as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use equimetrics::capture::frame::CapturedFrame;
use equimetrics::config::{self, AppConfig};
use equimetrics::morphometry::Calibration;
use equimetrics::nutrition::{ActivityLevel, FeedCategory, PhysiologicalState};
use equimetrics::storage::{self, Horse, HorseRepository, JsonFileRepository};
use equimetrics::vision::{ModelCache, ModelManager, OnnxModelLoader};
use equimetrics::EstimationPipeline;

/// Equimetrics - horse weight and ration estimation
#[derive(Parser, Debug)]
#[command(name = "equimetrics")]
#[command(about = "Estimate horse weight from photos, scan feed labels and plan rations")]
struct Args {
    /// Configuration file (defaults to config.toml in the config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate weight from a side-profile photo
    Weigh {
        horse: String,
        image: PathBuf,
        /// Withers height used as calibration (defaults to the stored height)
        #[arg(long)]
        height_cm: Option<f64>,
        /// Real height of a reference object in the photo, with --reference-px
        #[arg(long, requires = "reference_px")]
        reference_cm: Option<f64>,
        /// Pixel height of the reference object
        #[arg(long, requires = "reference_cm")]
        reference_px: Option<f64>,
        /// Body condition score, 1-9
        #[arg(long)]
        bcs: Option<u8>,
    },
    /// Record a weight entered by hand
    ManualWeight {
        horse: String,
        kg: f64,
        #[arg(long)]
        bcs: Option<u8>,
    },
    /// Weight history of a horse
    History { horse: String },
    /// Read a feed label photo and store the feed
    ScanLabel {
        horse: String,
        image: PathBuf,
        #[arg(long, value_enum, default_value = "pellet")]
        category: CategoryArg,
    },
    /// Plan a daily ration
    Ration {
        horse: String,
        forage: String,
        concentrate: String,
        /// Use this weight instead of the latest recorded one
        #[arg(long)]
        weight_kg: Option<f64>,
    },
    /// Feeds available to a horse
    Feeds { horse: String },
    /// Delete a custom feed
    RemoveFeed { horse: String, feed: String },
    /// Manage horses
    #[command(subcommand)]
    Horse(HorseCommand),
    /// Manage model files
    #[command(subcommand)]
    Models(ModelsCommand),
}

#[derive(Subcommand, Debug)]
enum HorseCommand {
    /// Create or update a horse
    Add {
        id: String,
        name: String,
        #[arg(long)]
        height_cm: Option<f64>,
        #[arg(long)]
        bcs: Option<u8>,
        #[arg(long, value_enum, default_value = "repos")]
        activity: ActivityArg,
        #[arg(long, value_enum, default_value = "normal")]
        state: StateArg,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// Show which model files are present
    Status,
    /// Download missing model files
    Fetch,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CategoryArg {
    Forage,
    Pellet,
    Cereal,
}

impl From<CategoryArg> for FeedCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Forage => FeedCategory::Forage,
            CategoryArg::Pellet => FeedCategory::Pellet,
            CategoryArg::Cereal => FeedCategory::Cereal,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ActivityArg {
    Repos,
    LoisirLeger,
    TravailModere,
    TravailIntense,
}

impl From<ActivityArg> for ActivityLevel {
    fn from(arg: ActivityArg) -> Self {
        match arg {
            ActivityArg::Repos => ActivityLevel::Repos,
            ActivityArg::LoisirLeger => ActivityLevel::LoisirLeger,
            ActivityArg::TravailModere => ActivityLevel::TravailModere,
            ActivityArg::TravailIntense => ActivityLevel::TravailIntense,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StateArg {
    Normal,
    Gestation,
    Lactation,
}

impl From<StateArg> for PhysiologicalState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Normal => PhysiologicalState::Normal,
            StateArg::Gestation => PhysiologicalState::Gestation,
            StateArg::Lactation => PhysiologicalState::Lactation,
        }
    }
}

#[derive(Serialize)]
struct ModelStatusRow {
    model: &'static str,
    path: PathBuf,
    available: bool,
    size_bytes: Option<u64>,
    downloadable: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref())?;
    run(args.command, config).await
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    let data_dir = match &config.storage.data_dir {
        Some(dir) => dir.clone(),
        None => storage::get_data_dir()?.join("horses"),
    };
    let repository: Arc<dyn HorseRepository> = Arc::new(JsonFileRepository::new(data_dir)?);
    let manager = ModelManager::from_config(&config)?;

    match command {
        Command::Models(ModelsCommand::Status) => {
            let rows: Vec<ModelStatusRow> = manager
                .get_model_status()
                .into_iter()
                .map(|s| ModelStatusRow {
                    model: s.model_type.display_name(),
                    path: s.path,
                    available: s.available,
                    size_bytes: s.size_bytes,
                    downloadable: s.downloadable,
                })
                .collect();
            print_json(&rows)
        }
        Command::Models(ModelsCommand::Fetch) => {
            let fetched = manager.ensure_all_models().await?;
            let names: Vec<&str> = fetched.iter().map(|m| m.display_name()).collect();
            print_json(&names)
        }
        Command::Horse(HorseCommand::Add {
            id,
            name,
            height_cm,
            bcs,
            activity,
            state,
        }) => {
            let mut horse = Horse::new(id, name);
            horse.height_cm = height_cm;
            horse.body_condition_score = bcs;
            horse.activity = activity.into();
            horse.state = state.into();
            repository.save_horse(&horse).await?;
            print_json(&horse)
        }
        Command::Horse(HorseCommand::List) => print_json(&repository.list_horses().await?),
        Command::History { horse } => print_json(&repository.weight_history(&horse).await?),
        Command::Feeds { horse } => print_json(&repository.list_feeds(&horse).await?),
        Command::RemoveFeed { horse, feed } => {
            repository.delete_custom_feed(&horse, &feed).await?;
            info!("Removed feed {}", feed);
            Ok(())
        }
        command => {
            let loader = Arc::new(OnnxModelLoader::new(
                manager,
                config.vision.clone(),
                config.ocr.clone(),
            ));
            let cache = Arc::new(ModelCache::new(loader));
            let pipeline = EstimationPipeline::new(cache, repository, config)?;
            run_pipeline(command, &pipeline).await
        }
    }
}

async fn run_pipeline(command: Command, pipeline: &EstimationPipeline) -> Result<()> {
    match command {
        Command::Weigh {
            horse,
            image,
            height_cm,
            reference_cm,
            reference_px,
            bcs,
        } => {
            let calibration = match (height_cm, reference_cm, reference_px) {
                (Some(height_cm), _, _) => Some(Calibration::HorseHeight { height_cm }),
                (None, Some(real_height_cm), Some(pixel_height)) => {
                    Some(Calibration::ReferenceObject {
                        real_height_cm,
                        pixel_height,
                    })
                }
                _ => None,
            };
            let frame = CapturedFrame::from_file(&image)
                .with_context(|| format!("Failed to read {:?}", image))?;
            let estimate = pipeline.estimate_weight(&horse, &frame, calibration, bcs).await?;
            print_json(&estimate)
        }
        Command::ManualWeight { horse, kg, bcs } => {
            print_json(&pipeline.record_manual_weight(&horse, kg, bcs).await?)
        }
        Command::ScanLabel {
            horse,
            image,
            category,
        } => {
            let frame = CapturedFrame::from_file(&image)
                .with_context(|| format!("Failed to read {:?}", image))?;
            let outcome = pipeline.scan_feed_label(&horse, &frame, category.into()).await?;
            print_json(&outcome)
        }
        Command::Ration {
            horse,
            forage,
            concentrate,
            weight_kg,
        } => {
            let plan = pipeline
                .generate_ration(&horse, &forage, &concentrate, weight_kg)
                .await?;
            print_json(&plan)
        }
        other => anyhow::bail!("{:?} does not use the estimation pipeline", other),
    }
}
