// media_vault - catalog scanner CLI
// Scans a library into SQLite, reports engine status, lists and exports records

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_vault::ffmpeg::is_ffmpeg_installed;
use media_vault::{
    AppConfig, MediaFilter, MediaScanner, MediaStore, MetadataExtractor, OcrEngineSelector,
    SqliteStore, SystemProbe,
};

#[derive(Parser)]
#[command(name = "media_vault", version, about = "MediaVault - photo and video metadata catalog")]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Catalog every supported file under a directory
    Scan {
        dir: PathBuf,

        /// Re-extract files that are already cataloged
        #[arg(long)]
        update_existing: bool,
    },
    /// Show which OCR engine would be used
    Status,
    /// Print cataloged records as JSON lines
    List(FilterArgs),
    /// Write cataloged records to a CSV file
    Export {
        out: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(ClapArgs)]
struct FilterArgs {
    /// Exact mood label ("All" disables the filter)
    #[arg(long)]
    mood: Option<String>,

    #[arg(long)]
    min_people: Option<u32>,

    #[arg(long)]
    max_people: Option<u32>,

    /// Substring of the keywords field
    #[arg(long)]
    keyword: Option<String>,
}

impl From<FilterArgs> for MediaFilter {
    fn from(args: FilterArgs) -> Self {
        MediaFilter {
            mood: args.mood,
            min_people: args.min_people,
            max_people: args.max_people,
            keyword: args.keyword,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = args.db {
        config.database_path = db;
    }

    match args.command {
        Command::Scan { dir, update_existing } => scan(config, dir, update_existing).await,
        Command::Status => {
            let selector = OcrEngineSelector::probe(&config.ocr, &SystemProbe::new());
            println!("{}", serde_json::to_string_pretty(&selector.engine_status())?);
            if !is_ffmpeg_installed(&config.extractor.ffmpeg_path) {
                warn!("ffmpeg not found at {}: videos and HEIC will not be analyzed", config.extractor.ffmpeg_path.display());
            }
            Ok(())
        }
        Command::List(filter) => {
            let store = SqliteStore::open(&config.database_path).context("Failed to open catalog")?;
            for record in store.get_filtered(&filter.into())? {
                println!("{}", serde_json::to_string(&record)?);
            }
            Ok(())
        }
        Command::Export { out, filter } => {
            let store = SqliteStore::open(&config.database_path).context("Failed to open catalog")?;
            let records = store.get_filtered(&filter.into())?;
            if store.export_csv(&out, Some(records.as_slice()))? {
                info!("   ✓ {} records written to {}", records.len(), out.display());
            } else {
                warn!("Nothing to export");
            }
            Ok(())
        }
    }
}

/// Run the scan on a blocking worker; progress comes back over a channel
async fn scan(config: AppConfig, dir: PathBuf, update_existing: bool) -> Result<()> {
    info!("🎬 Starting MediaVault scan of {}", dir.display());

    let store: Arc<dyn MediaStore> =
        Arc::new(SqliteStore::open(&config.database_path).context("Failed to open catalog")?);

    // Engine probing and cascade loading happen once, before the first file
    let ocr = Arc::new(OcrEngineSelector::probe(&config.ocr, &SystemProbe::new()));
    let extractor = Arc::new(MetadataExtractor::new(&config.extractor, ocr, config.ocr.max_summary_len));
    let scanner = MediaScanner::new(extractor.clone(), store);

    let stop = scanner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current file");
            stop.stop();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, usize, String)>();
    let worker = tokio::task::spawn_blocking(move || {
        let mut report = |current: usize, total: usize, name: &str| {
            let _ = tx.send((current, total, name.to_string()));
        };
        scanner.scan(&dir, Some(&mut report), update_existing)
    });

    while let Some((current, total, name)) = rx.recv().await {
        info!("   [{}/{}] {}", current, total, name);
    }

    let stats = worker.await.context("Scan worker panicked")??;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!("📊 Metrics: {}", serde_json::to_string(&extractor.metrics().snapshot())?);
    Ok(())
}
