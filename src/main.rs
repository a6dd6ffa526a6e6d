use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dj_analyzer::{
    analysis::FastScanAnalyzer,
    audio::BufferLoader,
    coordinator::{AnalysisCoordinator, AnalysisEvent, AnalysisRequest, FastOutcome},
    rules::SettingsOverride,
    Config, FileBufferLoader,
};

#[derive(Parser)]
#[command(
    name = "dj-analyzer",
    version,
    about = "Analyze tracks for DJ use: tempo, key, energy, loudness and cue points",
    long_about = "dj-analyzer runs a fast pass that returns usable results immediately, then a deep pass that adds phrase markers, tempo drift and transition difficulty."
)]
struct Cli {
    /// Application configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze audio files and print FAST and DEEP results as JSON
    Analyze {
        /// Audio files (WAV, MP3, FLAC, OGG, M4A)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Genre or subgenre used to pick rules and overrides
        #[arg(short, long)]
        genre: Option<String>,

        /// Release year, for era overrides
        #[arg(short, long)]
        year: Option<i32>,

        /// Stop after the fast pass
        #[arg(long)]
        fast_only: bool,
    },

    /// Inspect or edit analyzer settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print the resolved genre rules
    Rules {
        category: String,
        subgenre: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the settings a track would be analyzed with
    Show {
        #[arg(short, long)]
        genre: Option<String>,
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// Print the stored configuration as JSON
    Export,
    /// Replace settings from an exported JSON file
    Import { file: PathBuf },
    /// Merge a JSON object of settings into a genre override
    SetOverride { genre: String, json: String },
    /// Remove the override for a genre
    DeleteOverride { genre: String },
    /// Clear all overrides, or everything with --factory
    Reset {
        #[arg(long)]
        factory: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => Config::default(),
    };

    match cli.command {
        Command::Analyze {
            files,
            genre,
            year,
            fast_only,
        } => {
            if fast_only {
                analyze_fast_only(&config, files, genre, year).await
            } else {
                analyze(&config, files, genre, year).await
            }
        }
        Command::Config(command) => run_config_command(&config, command),
        Command::Rules { category, subgenre } => {
            let rules = config.load_rules()?.get_rules(Some(&category), subgenre.as_deref());
            println!("{}", serde_json::to_string_pretty(&rules)?);
            Ok(())
        }
    }
}

fn request_for(file: &std::path::Path, genre: &Option<String>, year: Option<i32>) -> AnalysisRequest {
    let mut request = AnalysisRequest::new(file.display().to_string());
    if let Some(genre) = genre {
        request = request.with_genre(genre.as_str());
    }
    if let Some(year) = year {
        request = request.with_year(year);
    }
    request
}

async fn analyze(config: &Config, files: Vec<PathBuf>, genre: Option<String>, year: Option<i32>) -> Result<()> {
    let coordinator = AnalysisCoordinator::new(
        Arc::new(FileBufferLoader::new()),
        Arc::new(config.open_store()),
        Arc::new(config.load_rules()?),
        config.coordinator.to_coordinator_config(),
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for file in &files {
        let done_tx = done_tx.clone();
        coordinator.subscribe(&file.display().to_string(), move |event| {
            match serde_json::to_string_pretty(&event.to_json()) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "Could not serialize event"),
            }
            if matches!(event, AnalysisEvent::DeepDone { .. } | AnalysisEvent::Error { .. }) {
                let _ = done_tx.send(event.track_id().to_string());
            }
        });
    }
    drop(done_tx);

    let mut waiting = HashSet::new();
    for file in &files {
        let request = request_for(file, &genre, year);
        let track_id = request.track_id.clone();
        match coordinator.submit(request).await {
            Ok(FastOutcome::Completed(_)) => {
                waiting.insert(track_id);
            }
            Ok(FastOutcome::AlreadyRunning) => {}
            // Already reported through the ERROR event
            Err(e) => warn!(file = %file.display(), error = %e, "Skipping track"),
        }
    }

    info!(tracks = waiting.len(), "Waiting for deep analysis");
    while !waiting.is_empty() {
        match done_rx.recv().await {
            Some(track_id) => {
                waiting.remove(&track_id);
            }
            None => break,
        }
    }
    Ok(())
}

async fn analyze_fast_only(
    config: &Config,
    files: Vec<PathBuf>,
    genre: Option<String>,
    year: Option<i32>,
) -> Result<()> {
    let store = config.open_store();
    let rule_set = config.load_rules()?;
    let loader = Arc::new(FileBufferLoader::new());

    for file in files {
        let request = request_for(&file, &genre, year);
        let settings = store.get_config_for_genre(genre.as_deref(), year);
        let rules = rule_set.rules_for_genre(genre.as_deref());
        let loader = Arc::clone(&loader);

        let result = tokio::task::spawn_blocking(move || {
            loader
                .load(&request.track_id)
                .map(|buffer| FastScanAnalyzer::analyze(&buffer, &settings, &rules))
        })
        .await?;

        match result {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => warn!(file = %file.display(), error = %e, "Skipping track"),
        }
    }
    Ok(())
}

fn run_config_command(config: &Config, command: ConfigCommand) -> Result<()> {
    let store = config.open_store();
    match command {
        ConfigCommand::Show { genre, year } => {
            let settings = store.get_config_for_genre(genre.as_deref(), year);
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigCommand::Export => {
            println!("{}", store.export_config()?);
        }
        ConfigCommand::Import { file } => {
            let json = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            store.import_config(&json)?;
            info!("Imported configuration from {:?}", file);
        }
        ConfigCommand::SetOverride { genre, json } => {
            let settings: SettingsOverride =
                serde_json::from_str(&json).context("override must be a JSON object")?;
            store.set_override(&genre, settings)?;
            info!(genre = %genre, "Override saved");
        }
        ConfigCommand::DeleteOverride { genre } => {
            if store.delete_override(&genre)? {
                info!(genre = %genre, "Override removed");
            } else {
                warn!(genre = %genre, "No override for this genre");
            }
        }
        ConfigCommand::Reset { factory } => {
            if factory {
                store.reset_to_factory_defaults(true)?;
                info!("Restored factory defaults");
            } else {
                store.reset_all_overrides()?;
                info!("Cleared all overrides");
            }
        }
    }
    Ok(())
}
