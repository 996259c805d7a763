//! export_dataset - build a YOLO training set from labeled video folders
//!
//! Videos under `--shoplifting` get class 1, videos under `--normal` class 0.
//! The dataset is split 70/15/15, optionally handed to an external trainer,
//! and removed afterwards unless `--keep-dataset` is given.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use shoplift_watch::config::WatchConfig;
use shoplift_watch::dataset::{self, DatasetExporter, ExportOptions, Split};
use shoplift_watch::load_detector;
use shoplift_watch::ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Folder of shoplifting videos (searched recursively).
    #[arg(long, default_value = "shoplifting_videos")]
    shoplifting: PathBuf,
    /// Folder of normal videos (searched recursively).
    #[arg(long, default_value = "normal_videos")]
    normal: PathBuf,
    /// Where the dataset is assembled.
    #[arg(long, default_value = "temp_dataset")]
    dataset_dir: PathBuf,
    /// Detector backend (stub|tract).
    #[arg(long)]
    backend: Option<String>,
    /// Path to the detector model (ONNX).
    #[arg(long, env = "SHOPLIFT_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Shuffle seed for the train/val/test split.
    #[arg(long, default_value_t = dataset::DEFAULT_SEED)]
    seed: u64,
    /// Video file extensions to pick up.
    #[arg(long, value_delimiter = ',', default_value = "mp4")]
    extensions: Vec<String>,
    /// Trainer command; `{data}` is replaced by the dataset.yaml path.
    #[arg(long)]
    trainer_cmd: Option<String>,
    /// Keep the dataset directory after training.
    #[arg(long)]
    keep_dataset: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = WatchConfig::load()?;
    if let Some(backend) = &args.backend {
        cfg.detector.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
        if args.backend.is_none() && cfg.detector.backend == "stub" {
            cfg.detector.backend = "tract".to_string();
        }
    }
    cfg.validate()?;

    let detector = {
        let _stage = ui.stage("Load detector");
        load_detector(&cfg.detector)?
    };

    let mut options = ExportOptions::new(&args.dataset_dir);
    options.seed = args.seed;
    options.extensions = args.extensions.clone();
    let mut exporter = DatasetExporter::new(detector, options);

    let summary = {
        let _stage = ui.stage("Export dataset");
        exporter
            .export(&args.shoplifting, &args.normal)
            .context("export dataset")?
    };
    for split in Split::ALL {
        let counts = summary.counts(split);
        println!(
            "{:<5} videos={} images={} labels={}",
            split.dir_name(),
            counts.videos,
            counts.images,
            counts.labels
        );
    }
    if summary.videos_skipped > 0 {
        log::warn!("{} videos could not be read", summary.videos_skipped);
    }
    println!("dataset config: {}", summary.manifest.display());

    let trained = match &args.trainer_cmd {
        Some(command) => {
            let _stage = ui.stage("Train");
            dataset::run_trainer(command, &summary.manifest)
        }
        None => Ok(()),
    };

    if args.keep_dataset {
        log::info!("keeping dataset at {}", summary.root.display());
    } else if args.trainer_cmd.is_some() {
        let _stage = ui.stage("Remove temporary dataset");
        dataset::cleanup(&summary.root)?;
    }
    trained
}
