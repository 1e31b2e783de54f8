//! radar-ocr command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use radar_ocr::analysis::Difficulty;
use radar_ocr::app::{run_scan, write_preview, ScanOptions};
use radar_ocr::capture::ImageSequenceSource;
use radar_ocr::config::settings::{load_settings, save_settings};
use radar_ocr::config::{self, AppConfig, Settings};
use radar_ocr::shared::SessionState;
use radar_ocr::storage::{self, load_catalog, PlayStyle};
use radar_ocr::vision::preprocess::VariantConfig;
use radar_ocr::vision::TesseractProvider;

/// radar-ocr - notes radar extraction from result-screen recordings
#[derive(Parser, Debug)]
#[command(name = "radar-ocr")]
#[command(about = "Extract notes radar records from recorded result screens")]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to config.toml in the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a directory of frames and write the extracted records
    Scan {
        /// Directory of frames extracted from the recording, played in name
        /// order (a trailing frame number is compared by value)
        #[arg(long)]
        frames: PathBuf,
        /// Settings JSON (perspective, detection, regions)
        #[arg(long)]
        settings: PathBuf,
        /// Music catalog JSON
        #[arg(long)]
        catalog: PathBuf,
        /// Output JSON file
        #[arg(long)]
        output: PathBuf,
        /// Play style of every chart in the recording (sp or dp)
        #[arg(long)]
        play_style: Option<PlayStyle>,
        /// Difficulty to use when no difficulty region is configured
        #[arg(long)]
        difficulty: Option<Difficulty>,
        /// Frame rate of the extracted frames (overrides the config)
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Write the rectified frame and all candidate bitmaps of one frame
    Preview {
        /// Frame image
        #[arg(long)]
        frame: PathBuf,
        /// Settings JSON
        #[arg(long)]
        settings: PathBuf,
        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Write the stock settings document
    InitSettings {
        /// Output file
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_or_create_config(args.config.as_deref())?;

    match args.command {
        Command::Scan {
            frames,
            settings,
            catalog,
            output,
            play_style,
            difficulty,
            fps,
        } => {
            let options = ScanOptions { play_style, difficulty };
            scan(config, &frames, &settings, &catalog, &output, options, fps).await
        }
        Command::Preview { frame, settings, out } => preview(&config, &frame, &settings, &out),
        Command::InitSettings { out } => {
            save_settings(&Settings::default(), &out)
                .with_context(|| format!("writing settings to {}", out.display()))?;
            info!("Wrote default settings to {}", out.display());
            Ok(())
        }
    }
}

/// Load configuration from the given file, the user config directory, or defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring unreadable configuration {:?}: {}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

async fn scan(
    mut config: AppConfig,
    frames: &Path,
    settings_path: &Path,
    catalog_path: &Path,
    output: &Path,
    options: ScanOptions,
    fps: Option<f64>,
) -> Result<()> {
    if let Some(fps) = fps {
        config.detection.frame_rate = fps;
    }

    let settings = load_settings(settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    let catalog = load_catalog(catalog_path)
        .with_context(|| format!("loading catalog from {}", catalog_path.display()))?;
    let mut source = ImageSequenceSource::open(frames, config.detection.frame_rate)
        .await
        .with_context(|| format!("opening frames in {}", frames.display()))?;
    let provider = TesseractProvider::new(&config.ocr);

    info!("radar-ocr scanning {} frames...", source.len());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current step");
            on_interrupt.cancel();
        }
    });

    let mut state = SessionState::new(config, settings, catalog);
    let end = run_scan(&mut state, &mut source, &provider, options, &cancel).await;

    // Records committed before a failure are still written
    state
        .store
        .save_json(output)
        .with_context(|| format!("writing records to {}", output.display()))?;
    let end = end.context("scan stopped early")?;

    let runtime = &state.runtime;
    info!(
        "Scan {:?}: {} changes, {} committed, {} duplicates, {} invalid, {} recognition failures, {} unreadable frames",
        end,
        runtime.changes_found,
        runtime.committed,
        runtime.duplicates,
        runtime.invalid,
        runtime.recognition_failures,
        runtime.frame_errors
    );
    Ok(())
}

fn preview(config: &AppConfig, frame: &Path, settings_path: &Path, out: &Path) -> Result<()> {
    let settings = load_settings(settings_path)
        .with_context(|| format!("loading settings from {}", settings_path.display()))?;
    let image = image::open(frame)
        .with_context(|| format!("reading frame {}", frame.display()))?
        .to_rgba8();

    let variants = VariantConfig {
        count: config.ocr.variant_count,
        step: config.ocr.variant_step,
    };
    let written = write_preview(&image, &settings, variants, out)?;
    println!("Wrote {} images to {}", written, out.display());
    Ok(())
}
