//! Shoplift Watch
//!
//! Runs a pretrained object detector over video files, GIFs and network
//! streams, draws the detections onto each frame, raises a per-frame alert
//! verdict, saves the annotated frames, and exports YOLO-format training sets
//! from folders of labeled videos.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames
//! - `ingest`: frame sources (files, GIFs, streams, synthetic clips)
//! - `detect`: detector backends and validated detections
//! - `decision`: per-frame alert rules
//! - `annotate`: boxes, labels and banners
//! - `playback`: the tick loop, sinks and cancellation
//! - `persist`: session-scoped frame writer
//! - `dataset`: training-set export
//! - `config`: layered configuration
//! - `ui`: stderr stage/progress reporting

pub mod annotate;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod persist;
pub mod playback;
pub mod ui;

pub use annotate::{AnnotationStyle, Annotator};
pub use config::{DetectorSettings, FrameFormat, WatchConfig};
pub use decision::{AlertClassRule, DecisionRule, FrameVerdict, PersonCountRule};
pub use detect::{load_detector, ClassNames, Detection, Detector, DetectorBackend, RawDetection};
pub use error::{PipelineError, PipelineResult};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, Next, SourceKind, SourceStats};
pub use persist::FrameWriter;
pub use playback::{
    play_gif, CancelToken, FrameReport, FrameSink, Playback, PlaybackState, SessionSummary,
    TickOutcome,
};

/// Assemble a `Playback` from configuration around an already loaded
/// detector. Sinks are left to the caller.
pub fn playback_from_config(cfg: &WatchConfig, detector: Detector) -> anyhow::Result<Playback> {
    let rule = cfg.build_rule()?;
    let annotator = Annotator::new(cfg.annotation.clone());
    let threshold = cfg.decision.threshold;
    let playback = if cfg.playback.use_worker {
        Playback::threaded(detector, rule, annotator, threshold)?
    } else {
        Playback::new(detector, rule, annotator, threshold)
    };
    Ok(playback.with_tick_interval(cfg.playback.tick_interval))
}
