//! shoplift_watch - run the detector over a video file, GIF or stream
//!
//! Loads the detector once, opens the source, then ticks frame by frame:
//! detect, decide, annotate, log, and save each annotated frame under
//! `<output_dir>/<session>/`. Ctrl-C stops the loop after the current frame.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use shoplift_watch::config::{FrameFormat, RuleKind, WatchConfig};
use shoplift_watch::ingest::{classify, gif, GifClip, SourceKind};
use shoplift_watch::playback::{LogSink, PreviewSink};
use shoplift_watch::ui;
use shoplift_watch::{
    load_detector, play_gif, playback_from_config, CancelToken, FrameSink, FrameWriter,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file, GIF, rtsp:// / http(s):// URL or stub:// source.
    /// Falls back to the configured stream URL.
    source: Option<String>,
    /// Detector backend (stub|tract).
    #[arg(long)]
    backend: Option<String>,
    /// Path to the detector model (ONNX).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Confidence a detection must exceed to alert and be drawn.
    #[arg(long)]
    threshold: Option<f32>,
    /// Class name (or id) that raises an alert.
    #[arg(long)]
    alert_class: Option<String>,
    /// Decision rule (alert_class|person_count).
    #[arg(long)]
    rule: Option<String>,
    /// Directory that receives one subdirectory of frames per session.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Do not save annotated frames.
    #[arg(long)]
    no_persist: bool,
    /// Saved frame format (jpg|png).
    #[arg(long)]
    format: Option<String>,
    /// Keep this image updated with the latest annotated frame.
    #[arg(long)]
    preview: Option<PathBuf>,
    /// Run detection on a worker thread.
    #[arg(long)]
    worker: bool,
    /// Run detection on a GIF instead of looping it for display.
    #[arg(long)]
    analyze_gif: bool,
    /// Stop GIF display after this many frames (default: until Ctrl-C).
    #[arg(long)]
    max_ticks: Option<u64>,
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

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = WatchConfig::load()?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };

    let source = args
        .source
        .clone()
        .or_else(|| cfg.stream_url.clone())
        .ok_or_else(|| anyhow!("no source given and no stream URL configured"))?;

    // A model that fails to load ends the process before any source is opened.
    let detector = {
        let _stage = ui.stage("Load detector");
        load_detector(&cfg.detector).map_err(|e| {
            log::error!("{}", e);
            e
        })?
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, stopping after the current frame");
        handler_token.cancel();
    })
    .context("set Ctrl-C handler")?;

    if classify(&source) == SourceKind::Gif && !args.analyze_gif {
        let clip = {
            let _stage = ui.stage("Decode GIF");
            GifClip::decode(std::path::Path::new(&source), gif::DEFAULT_MAX_FRAMES)?
        };
        log::info!("looping {} ({} frames)", source, clip.len());
        let mut sinks: Vec<Box<dyn FrameSink>> =
            vec![Box::new(LogSink), Box::new(ui.frame_counter(&source))];
        if let Some(path) = &args.preview {
            sinks.push(Box::new(PreviewSink::new(path)));
        }
        let shown = play_gif(clip, cfg.playback.gif_delay, &mut sinks, &cancel, args.max_ticks);
        log::info!("displayed {} gif frames", shown);
        return Ok(());
    }

    let mut playback = playback_from_config(&cfg, detector)?
        .with_sink(Box::new(LogSink))
        .with_sink(Box::new(ui.frame_counter(&source)));
    if cfg.output.persist {
        let writer = FrameWriter::for_new_session(&cfg.output.output_dir, cfg.output.image_format);
        log::info!("saving annotated frames to {}", writer.session_dir().display());
        playback = playback.with_sink(Box::new(writer));
    }
    if let Some(path) = &args.preview {
        playback = playback.with_sink(Box::new(PreviewSink::new(path)));
    }

    {
        let _stage = ui.stage("Open source");
        playback.open(&source)?;
    }
    let summary = playback.run(&cancel)?;

    println!(
        "frames: {} emitted, {} skipped, {} alerts, {} inference failures",
        summary.frames_emitted,
        summary.frames_skipped,
        summary.alert_frames,
        summary.inference_failures
    );
    Ok(())
}

fn apply_args(cfg: &mut WatchConfig, args: &Args) -> Result<()> {
    if let Some(backend) = &args.backend {
        cfg.detector.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = Some(model.clone());
        if args.backend.is_none() && cfg.detector.backend == "stub" {
            cfg.detector.backend = "tract".to_string();
        }
    }
    if let Some(threshold) = args.threshold {
        cfg.decision.threshold = threshold;
    }
    if let Some(class) = &args.alert_class {
        cfg.decision.alert_class = class.clone();
    }
    if let Some(rule) = &args.rule {
        cfg.decision.rule = RuleKind::parse(rule)?;
    }
    if let Some(dir) = &args.output_dir {
        cfg.output.output_dir = dir.clone();
    }
    if args.no_persist {
        cfg.output.persist = false;
    }
    if let Some(format) = &args.format {
        cfg.output.image_format = FrameFormat::parse(format)?;
    }
    if args.worker {
        cfg.playback.use_worker = true;
    }
    Ok(())
}
