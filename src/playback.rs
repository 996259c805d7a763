//! The playback / capture loop.
//!
//! One tick processes exactly one frame:
//! `source.next_frame -> detector.detect -> rule.classify -> annotate -> sinks`.
//!
//! ```text
//! Idle --open--> Opening --ok--> Streaming <--pause/resume--> Paused
//!                   |                |
//!                   +--err--+        +--end of stream / cancel / fatal error
//!                           v        v
//!                            Closed
//! ```
//!
//! Per-frame problems never stop the loop: a frame that fails to decode is
//! skipped, a frame the detector fails on is emitted unannotated, and a sink
//! that fails to persist is logged and counted.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;

use crate::annotate::Annotator;
use crate::decision::{DecisionRule, FrameVerdict};
use crate::detect::{ClassNames, Detection, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::ingest::{self, FrameSource, GifClip, GifPlayer, Next, SourceStats};

const WORKER_POLL: Duration = Duration::from_millis(50);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Opening,
    Streaming,
    Paused,
    Closed,
}

/// Shared stop flag. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one emitted frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub index: u64,
    pub detections: Vec<Detection>,
    pub verdict: FrameVerdict,
    /// False when the detector failed and the raw frame was passed through.
    pub annotated: bool,
    pub inference_error: Option<String>,
}

#[derive(Debug)]
pub enum TickOutcome {
    Emitted(FrameReport),
    Skipped { frame: Option<u64>, reason: String },
    Finished,
    Paused,
    /// Cancellation was observed while waiting on the inference worker.
    Cancelled,
}

#[derive(Clone, Debug, Default)]
pub struct SessionSummary {
    pub frames_emitted: u64,
    pub frames_skipped: u64,
    pub alert_frames: u64,
    pub inference_failures: u64,
    pub sink_failures: u64,
    pub cancelled: bool,
    pub source: SourceStats,
}

pub trait FrameSink {
    fn name(&self) -> &'static str;

    fn emit(&mut self, report: &FrameReport, image: &RgbImage) -> PipelineResult<()>;

    /// Called once when the session ends.
    fn finish(&mut self) {}
}

/// Display stand-in: one log line per frame.
#[derive(Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn emit(&mut self, report: &FrameReport, image: &RgbImage) -> PipelineResult<()> {
        log::debug!(
            "frame {} {}x{} detections={} alert={} annotated={}",
            report.index,
            image.width(),
            image.height(),
            report.detections.len(),
            report.verdict.alert,
            report.annotated
        );
        Ok(())
    }
}

/// Keeps a single image on disk up to date with the latest frame.
pub struct PreviewSink {
    path: PathBuf,
}

impl PreviewSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PreviewSink {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn emit(&mut self, _report: &FrameReport, image: &RgbImage) -> PipelineResult<()> {
        image
            .save(&self.path)
            .map_err(|e| PipelineError::PersistFailure {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Clone, Debug)]
pub struct CollectedFrame {
    pub report: FrameReport,
    pub image: RgbImage,
}

/// Keeps every emitted frame in memory. `handle()` stays readable after the
/// sink has been moved into a `Playback`.
#[derive(Clone, Debug, Default)]
pub struct CollectSink {
    frames: Arc<Mutex<Vec<CollectedFrame>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<CollectedFrame>>> {
        Arc::clone(&self.frames)
    }
}

impl FrameSink for CollectSink {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn emit(&mut self, report: &FrameReport, image: &RgbImage) -> PipelineResult<()> {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(CollectedFrame {
                report: report.clone(),
                image: image.clone(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Inference worker
// ----------------------------------------------------------------------------

type WorkerReply = (Frame, PipelineResult<Vec<Detection>>);

/// Runs the detector on its own thread, one frame at a time.
///
/// Both channels have capacity 1, so at most one detection is in flight and
/// replies come back in submission order.
pub struct InferenceWorker {
    requests: Option<Sender<Frame>>,
    replies: Receiver<WorkerReply>,
    handle: Option<JoinHandle<()>>,
    /// A frame was sent and its reply has not been read yet.
    pending: bool,
}

impl InferenceWorker {
    pub fn spawn(mut detector: Detector) -> PipelineResult<Self> {
        let (request_tx, request_rx) = bounded::<Frame>(1);
        let (reply_tx, reply_rx) = bounded::<WorkerReply>(1);
        let handle = std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                while let Ok(frame) = request_rx.recv() {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&frame)))
                        .unwrap_or_else(|_| {
                            Err(PipelineError::inference(frame.index, "detector panicked"))
                        });
                    if reply_tx.send((frame, result)).is_err() {
                        break;
                    }
                }
                log::debug!("inference worker exiting");
            })
            .map_err(|e| PipelineError::ModelLoad {
                path: "inference worker".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            handle: Some(handle),
            pending: false,
        })
    }

    /// Send a frame and wait for its detections. Returns `Ok(None)` if
    /// `cancel` fires first; the in-flight detection still completes on the
    /// worker and its reply is discarded. A worker that has gone away is
    /// `WorkerStopped`.
    pub fn detect(
        &mut self,
        frame: Frame,
        cancel: &CancelToken,
    ) -> PipelineResult<Option<WorkerReply>> {
        if self.pending {
            // Drain a reply abandoned by an earlier cancellation.
            let _ = self.replies.recv();
            self.pending = false;
        }
        let index = frame.index;
        let stopped =
            || PipelineError::WorkerStopped(format!("frame {} was not processed", index));
        let requests = self.requests.as_ref().ok_or_else(stopped)?;
        if requests.send(frame).is_err() {
            return Err(stopped());
        }
        self.pending = true;
        loop {
            match self.replies.recv_timeout(WORKER_POLL) {
                Ok(reply) => {
                    self.pending = false;
                    return Ok(Some(reply));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.pending = false;
                    return Err(stopped());
                }
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if self.pending {
                let _ = self.replies.recv();
            }
            if handle.join().is_err() {
                log::warn!("inference worker panicked");
            }
        }
    }
}

enum Inference {
    Inline(Detector),
    Worker(InferenceWorker),
}

// ----------------------------------------------------------------------------
// Playback
// ----------------------------------------------------------------------------

pub struct Playback {
    state: PlaybackState,
    source: Option<Box<dyn FrameSource>>,
    inference: Inference,
    names: ClassNames,
    rule: Box<dyn DecisionRule>,
    annotator: Annotator,
    threshold: f32,
    sinks: Vec<Box<dyn FrameSink>>,
    tick_interval: Duration,
    cancel: CancelToken,
    summary: SessionSummary,
    finished: bool,
}

impl Playback {
    /// `threshold` decides which detections get drawn; the rule decides the
    /// verdict. Detection runs on the calling thread.
    pub fn new(
        detector: Detector,
        rule: Box<dyn DecisionRule>,
        annotator: Annotator,
        threshold: f32,
    ) -> Self {
        let names = detector.names().clone();
        Self::build(Inference::Inline(detector), names, rule, annotator, threshold)
    }

    /// Like `new`, but detection runs on a dedicated worker thread.
    pub fn threaded(
        detector: Detector,
        rule: Box<dyn DecisionRule>,
        annotator: Annotator,
        threshold: f32,
    ) -> PipelineResult<Self> {
        let names = detector.names().clone();
        let worker = InferenceWorker::spawn(detector)?;
        Ok(Self::build(Inference::Worker(worker), names, rule, annotator, threshold))
    }

    fn build(
        inference: Inference,
        names: ClassNames,
        rule: Box<dyn DecisionRule>,
        annotator: Annotator,
        threshold: f32,
    ) -> Self {
        Self {
            state: PlaybackState::Idle,
            source: None,
            inference,
            names,
            rule,
            annotator,
            threshold,
            sinks: Vec::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            cancel: CancelToken::new(),
            summary: SessionSummary::default(),
            finished: false,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Open a path, URL or `stub://` source.
    pub fn open(&mut self, spec: &str) -> PipelineResult<()> {
        self.ensure_idle(spec)?;
        self.state = PlaybackState::Opening;
        match ingest::open_source(spec) {
            Ok(source) => {
                self.attach(source);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to open {}: {}", spec, e);
                self.state = PlaybackState::Closed;
                Err(e)
            }
        }
    }

    /// Start streaming from an already opened source.
    pub fn open_with(&mut self, source: Box<dyn FrameSource>) -> PipelineResult<()> {
        self.ensure_idle(source.source_id())?;
        self.attach(source);
        Ok(())
    }

    fn ensure_idle(&self, spec: &str) -> PipelineResult<()> {
        if self.state != PlaybackState::Idle {
            return Err(PipelineError::source_unavailable(
                spec,
                format!("playback is {:?}, not Idle", self.state),
            ));
        }
        Ok(())
    }

    fn attach(&mut self, source: Box<dyn FrameSource>) {
        self.summary.source = source.stats();
        self.source = Some(source);
        self.state = PlaybackState::Streaming;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Streaming {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Streaming;
        }
    }

    /// Process exactly one frame.
    pub fn tick(&mut self) -> PipelineResult<TickOutcome> {
        match self.state {
            PlaybackState::Paused => return Ok(TickOutcome::Paused),
            PlaybackState::Closed => return Ok(TickOutcome::Finished),
            PlaybackState::Idle | PlaybackState::Opening => {
                return Err(PipelineError::source_unavailable("", "no source is open"))
            }
            PlaybackState::Streaming => {}
        }
        let Some(source) = self.source.as_mut() else {
            self.state = PlaybackState::Closed;
            return Ok(TickOutcome::Finished);
        };

        let frame = match source.next_frame() {
            Ok(Next::Frame(frame)) => frame,
            Ok(Next::EndOfStream) => {
                log::info!("end of stream: {}", source.source_id());
                self.close();
                return Ok(TickOutcome::Finished);
            }
            Err(e) if e.is_recoverable() => {
                self.summary.frames_skipped += 1;
                log::warn!("skipping frame: {}", e);
                let frame = match &e {
                    PipelineError::DecodeFailure { frame, .. } => Some(*frame),
                    _ => None,
                };
                return Ok(TickOutcome::Skipped {
                    frame,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                log::error!("source failed: {}", e);
                self.close();
                return Err(e);
            }
        };

        let (mut frame, detected) = match &mut self.inference {
            Inference::Inline(detector) => {
                let result = detector.detect(&frame);
                (frame, result)
            }
            Inference::Worker(worker) => match worker.detect(frame, &self.cancel) {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(TickOutcome::Cancelled),
                Err(e) => {
                    log::error!("{}", e);
                    self.close();
                    return Err(e);
                }
            },
        };

        let report = match detected {
            Ok(detections) => {
                let verdict = self.rule.classify(&detections);
                self.annotator.annotate(
                    &mut frame.image,
                    &detections,
                    &verdict,
                    self.threshold,
                    &self.names,
                );
                if verdict.alert {
                    self.summary.alert_frames += 1;
                    let triggered: Vec<String> = verdict
                        .triggers
                        .iter()
                        .filter_map(|&i| detections.get(i))
                        .map(|d| format!("{} {:.2}", self.names.name(d.class_id()), d.confidence()))
                        .collect();
                    log::info!(
                        "frame {}: alert ({}) triggered by [{}]",
                        frame.index,
                        self.rule.name(),
                        triggered.join(", ")
                    );
                }
                FrameReport {
                    index: frame.index,
                    detections,
                    verdict,
                    annotated: true,
                    inference_error: None,
                }
            }
            Err(e) => {
                self.summary.inference_failures += 1;
                log::warn!("{}; emitting raw frame", e);
                FrameReport {
                    index: frame.index,
                    detections: Vec::new(),
                    verdict: FrameVerdict::normal(),
                    annotated: false,
                    inference_error: Some(e.to_string()),
                }
            }
        };

        for sink in &mut self.sinks {
            if let Err(e) = sink.emit(&report, &frame.image) {
                self.summary.sink_failures += 1;
                log::warn!("sink {} failed on frame {}: {}", sink.name(), report.index, e);
            }
        }
        self.summary.frames_emitted += 1;
        if let Some(source) = self.source.as_ref() {
            self.summary.source = source.stats();
        }
        Ok(TickOutcome::Emitted(report))
    }

    /// Tick at the configured cadence until the source ends or `cancel` fires.
    pub fn run(&mut self, cancel: &CancelToken) -> PipelineResult<SessionSummary> {
        self.cancel = cancel.clone();
        let result = self.run_loop();
        self.close();
        self.finish_sinks();
        let summary = self.summary.clone();
        log::info!(
            "session done: emitted={} skipped={} alerts={} inference_failures={} sink_failures={} cancelled={}",
            summary.frames_emitted,
            summary.frames_skipped,
            summary.alert_frames,
            summary.inference_failures,
            summary.sink_failures,
            summary.cancelled
        );
        result.map(|_| summary)
    }

    fn run_loop(&mut self) -> PipelineResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                self.summary.cancelled = true;
                return Ok(());
            }
            let started = Instant::now();
            match self.tick()? {
                TickOutcome::Finished => return Ok(()),
                TickOutcome::Cancelled => {
                    self.summary.cancelled = self.cancel.is_cancelled();
                    return Ok(());
                }
                TickOutcome::Emitted(_) | TickOutcome::Skipped { .. } | TickOutcome::Paused => {}
            }
            if let Some(rest) = self.tick_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    /// Release the source. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            self.summary.source = source.stats();
        }
        if self.state != PlaybackState::Idle {
            self.state = PlaybackState::Closed;
        }
    }

    fn finish_sinks(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for sink in &mut self.sinks {
            sink.finish();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.close();
    }
}

/// Loop a GIF on the sinks. No detection or annotation happens here.
///
/// Stops when `cancel` fires or after `max_ticks` frames. Returns the number
/// of frames emitted.
pub fn play_gif(
    clip: GifClip,
    delay: Duration,
    sinks: &mut [Box<dyn FrameSink>],
    cancel: &CancelToken,
    max_ticks: Option<u64>,
) -> u64 {
    let mut player = GifPlayer::new(clip, delay);
    let mut emitted = 0u64;
    while !cancel.is_cancelled() && max_ticks.map_or(true, |max| emitted < max) {
        let report = FrameReport {
            index: player.index() as u64,
            detections: Vec::new(),
            verdict: FrameVerdict::normal(),
            annotated: false,
            inference_error: None,
        };
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.emit(&report, player.current()) {
                log::warn!("sink {} failed on gif frame {}: {}", sink.name(), report.index, e);
            }
        }
        emitted += 1;
        player.tick();
        if max_ticks.map_or(true, |max| emitted < max) {
            std::thread::sleep(player.delay());
        }
    }
    for sink in sinks.iter_mut() {
        sink.finish();
    }
    emitted
}
