//! demo - end-to-end synthetic run, no model or video files needed
//!
//! Plays a synthetic clip through a scripted detector, saves the annotated
//! frames, then exports a small training set from synthetic "videos".

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shoplift_watch::config::FrameFormat;
use shoplift_watch::dataset::{DatasetExporter, ExportOptions, Split};
use shoplift_watch::detect::ScriptedBackend;
use shoplift_watch::ingest::{FrameSource, SyntheticSource};
use shoplift_watch::playback::LogSink;
use shoplift_watch::{
    AlertClassRule, Annotator, CancelToken, ClassNames, Detector, FrameWriter, PipelineError,
    Playback, RawDetection,
};

const CLASS_NAMES: [&str; 2] = ["normal", "shoplifting"];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames.
    #[arg(long, default_value_t = 30)]
    frames: u64,
    /// Frame width.
    #[arg(long, default_value_t = 320)]
    width: u32,
    /// Frame height.
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// Output directory for frames and the demo dataset.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Optional deterministic seed for the scripted detections.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.frames == 0 || args.width < 16 || args.height < 16 {
        return Err(anyhow!("need at least one frame of at least 16x16"));
    }
    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    stage("play synthetic clip");
    let backend = scripted_backend(&mut rng, args.frames, args.width, args.height);
    let detector = Detector::new(backend, ClassNames::new(CLASS_NAMES));
    let writer = FrameWriter::for_new_session(out_dir.join("frames"), FrameFormat::Png);
    let session_dir = writer.session_dir().to_path_buf();
    let mut playback = Playback::new(
        detector,
        Box::new(AlertClassRule::new(1, AlertClassRule::DEFAULT_THRESHOLD)),
        Annotator::default(),
        AlertClassRule::DEFAULT_THRESHOLD,
    )
    .with_sink(Box::new(LogSink))
    .with_sink(Box::new(writer))
    .with_tick_interval(Duration::from_millis(1));
    playback.open(&format!(
        "stub://clip?frames={}&width={}&height={}",
        args.frames, args.width, args.height
    ))?;
    let summary = playback.run(&CancelToken::new())?;

    stage("export demo dataset");
    let dataset_root = out_dir.join("dataset");
    let videos = out_dir.join("videos");
    let shoplifting = videos.join("shoplifting");
    let normal = videos.join("normal");
    for (dir, prefix) in [(&shoplifting, "shoplifting"), (&normal, "normal")] {
        fs::create_dir_all(dir)?;
        for i in 0..3 {
            fs::write(dir.join(format!("{}_{}.mp4", prefix, i)), b"synthetic")?;
        }
    }
    let export_backend = scripted_backend(&mut rng, 8, 640, 640);
    let mut exporter = DatasetExporter::new(
        Detector::new(export_backend, ClassNames::new(CLASS_NAMES)),
        ExportOptions::new(&dataset_root),
    )
    .with_opener(Box::new(|_path: &Path| {
        let source = SyntheticSource::parse("stub://clip?frames=8&width=160&height=120")?;
        Ok::<Box<dyn FrameSource>, PipelineError>(Box::new(source))
    }));
    let export = exporter.export(&shoplifting, &normal)?;

    println!("demo summary:");
    println!("  frames emitted: {}", summary.frames_emitted);
    println!("  alert frames: {}", summary.alert_frames);
    println!("  annotated frames: {}", session_dir.display());
    for split in Split::ALL {
        let counts = export.counts(split);
        println!(
            "  {:<5} videos={} images={}",
            split.dir_name(),
            counts.videos,
            counts.images
        );
    }
    println!("  dataset config: {}", export.manifest.display());
    println!("next steps:");
    println!("  ls -la {}", session_dir.display());
    Ok(())
}

/// Roughly one frame in three carries a confident "shoplifting" box; the rest
/// get a low-confidence "normal" box or nothing.
fn scripted_backend(rng: &mut StdRng, frames: u64, width: u32, height: u32) -> ScriptedBackend {
    let mut backend = ScriptedBackend::new();
    for index in 0..frames {
        let w = rng.gen_range(width as f32 * 0.2..width as f32 * 0.5);
        let h = rng.gen_range(height as f32 * 0.3..height as f32 * 0.6);
        let x1 = rng.gen_range(0.0..width as f32 - w);
        let y1 = rng.gen_range(0.0..height as f32 - h);
        let detections = match rng.gen_range(0..3) {
            0 => vec![RawDetection::new(x1, y1, x1 + w, y1 + h, 1, rng.gen_range(0.6..0.99))],
            1 => vec![RawDetection::new(x1, y1, x1 + w, y1 + h, 0, rng.gen_range(0.55..0.9))],
            _ => Vec::new(),
        };
        backend = backend.on_frame(index, detections);
    }
    backend
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
