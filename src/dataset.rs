//! Training-set export.
//!
//! Two folders of labeled videos (`shoplifting` and `normal`) become a
//! YOLO-format dataset:
//!
//! ```text
//! <root>/dataset.yaml
//! <root>/{train,val,test}/images/<label>_<video>_<frame>.jpg
//! <root>/{train,val,test}/labels/<label>_<video>_<frame>.txt
//! ```
//!
//! Every frame is resized to 640x640 and run through the detector. Frames
//! with at least one detection above the confidence floor are kept, and each
//! qualifying box becomes one label line carrying the video's folder label as
//! its class. Videos are split 70 / 15 / 15; with fewer videos than splits the
//! kept frames are split instead. Training itself is delegated to an external
//! command.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::detect::{Detection, Detector};
use crate::error::PipelineResult;
use crate::frame::Frame;
use crate::ingest::{self, FrameSource, Next};

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_FRAME_SIZE: u32 = 640;
pub const DEFAULT_LABEL_CONFIDENCE: f32 = 0.5;
pub const DATASET_YAML: &str = "dataset.yaml";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

/// Folder label of a video. The discriminant is the YOLO class id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoLabel {
    Normal = 0,
    Shoplifting = 1,
}

impl VideoLabel {
    pub const NAMES: [&'static str; 2] = ["normal", "shoplifting"];

    pub fn class_id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabeledVideo {
    pub path: PathBuf,
    pub label: VideoLabel,
    /// Prefix of every image and label file cut from this video. Unique
    /// within one export.
    pub name: String,
}

/// Give each video a file prefix of `<label>_<stem>`. A prefix already taken
/// gets the first free `-2`, `-3`, ... suffix.
pub fn label_videos(paths: Vec<(PathBuf, VideoLabel)>) -> Vec<LabeledVideo> {
    let mut taken: HashSet<String> = HashSet::new();
    paths
        .into_iter()
        .map(|(path, label)| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "video".to_string());
            let base = format!("{}_{}", label.name(), stem);
            let mut name = base.clone();
            let mut n = 1;
            while taken.contains(&name) {
                n += 1;
                name = format!("{}-{}", base, n);
            }
            taken.insert(name.clone());
            LabeledVideo { path, label, name }
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SplitPlan<T> {
    pub train: Vec<T>,
    pub val: Vec<T>,
    pub test: Vec<T>,
}

impl<T> SplitPlan<T> {
    pub fn get(&self, split: Split) -> &[T] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// All files under `root` whose extension is in `extensions`
/// (case-insensitive), recursively, in sorted order.
pub fn discover_videos(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("read video folder {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if has_extension(&path, extensions) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Deterministic shuffle followed by a 70 / 15 / 15 split.
///
/// With three or more items every split gets at least one.
pub fn split_dataset<T>(mut items: Vec<T>, seed: u64) -> SplitPlan<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let n = items.len();
    let mut n_val = (n as f64 * 0.15).round() as usize;
    let mut n_test = (n as f64 * 0.15).round() as usize;
    if n >= 3 {
        n_val = n_val.max(1);
        n_test = n_test.max(1);
    }
    let n_test = n_test.min(n);
    let n_val = n_val.min(n - n_test);

    let test = items.split_off(n - n_test);
    let val = items.split_off(items.len() - n_val);
    SplitPlan {
        train: items,
        val,
        test,
    }
}

#[derive(Serialize)]
struct DatasetManifest<'a> {
    path: String,
    train: &'a str,
    val: &'a str,
    test: &'a str,
    nc: usize,
    names: Vec<&'a str>,
}

/// Write `dataset.yaml` under `root` and return its path.
pub fn write_manifest(root: &Path) -> Result<PathBuf> {
    let manifest = DatasetManifest {
        path: root.display().to_string(),
        train: "train/images",
        val: "val/images",
        test: "test/images",
        nc: VideoLabel::NAMES.len(),
        names: VideoLabel::NAMES.to_vec(),
    };
    let yaml = serde_yaml::to_string(&manifest).context("serialize dataset manifest")?;
    let path = root.join(DATASET_YAML);
    std::fs::write(&path, yaml).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// One YOLO label line: `class x_center y_center width height`, normalized.
pub fn label_line(class_id: u32, detection: &Detection, width: u32, height: u32) -> String {
    let [xc, yc, w, h] = detection.to_yolo(width, height);
    format!("{} {:.6} {:.6} {:.6} {:.6}", class_id, xc, yc, w, h)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitCounts {
    pub videos: usize,
    pub images: usize,
    pub labels: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ExportSummary {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub train: SplitCounts,
    pub val: SplitCounts,
    pub test: SplitCounts,
    pub videos_skipped: usize,
    pub frames_seen: u64,
}

impl ExportSummary {
    pub fn counts(&self, split: Split) -> &SplitCounts {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    fn counts_mut(&mut self, split: Split) -> &mut SplitCounts {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub root: PathBuf,
    pub seed: u64,
    pub extensions: Vec<String>,
    pub frame_size: u32,
    /// Detections must score strictly above this to become labels.
    pub min_confidence: f32,
}

impl ExportOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seed: DEFAULT_SEED,
            extensions: vec!["mp4".to_string()],
            frame_size: DEFAULT_FRAME_SIZE,
            min_confidence: DEFAULT_LABEL_CONFIDENCE,
        }
    }
}

pub type SourceOpener = Box<dyn Fn(&Path) -> PipelineResult<Box<dyn FrameSource>>>;

pub struct DatasetExporter {
    detector: Detector,
    options: ExportOptions,
    opener: SourceOpener,
}

impl DatasetExporter {
    pub fn new(detector: Detector, options: ExportOptions) -> Self {
        Self {
            detector,
            options,
            opener: Box::new(|path: &Path| ingest::open_source(&path.to_string_lossy())),
        }
    }

    /// Replace how video paths are turned into frame sources.
    pub fn with_opener(mut self, opener: SourceOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    pub fn export(&mut self, shoplifting_dir: &Path, normal_dir: &Path) -> Result<ExportSummary> {
        let mut paths = Vec::new();
        for (dir, label) in [
            (shoplifting_dir, VideoLabel::Shoplifting),
            (normal_dir, VideoLabel::Normal),
        ] {
            for path in discover_videos(dir, &self.options.extensions)? {
                paths.push((path, label));
            }
        }
        if paths.is_empty() {
            return Err(anyhow!(
                "no videos found under {} or {}",
                shoplifting_dir.display(),
                normal_dir.display()
            ));
        }
        let videos = label_videos(paths);
        log::info!("found {} videos", videos.len());

        let root = self.options.root.clone();
        for split in Split::ALL {
            for sub in ["images", "labels"] {
                let dir = root.join(split.dir_name()).join(sub);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("create {}", dir.display()))?;
            }
        }
        log::info!("dataset root: {}", root.display());

        let mut summary = ExportSummary {
            root: root.clone(),
            ..ExportSummary::default()
        };
        if videos.len() >= Split::ALL.len() {
            self.export_by_video(videos, &mut summary)?;
        } else {
            log::info!(
                "only {} videos; splitting frames instead of videos",
                videos.len()
            );
            self.export_by_frame(videos, &mut summary)?;
        }

        summary.manifest = write_manifest(&root)?;
        log::info!("wrote {}", summary.manifest.display());
        Ok(summary)
    }

    fn export_by_video(
        &mut self,
        videos: Vec<LabeledVideo>,
        summary: &mut ExportSummary,
    ) -> Result<()> {
        let root = self.options.root.clone();
        let plan = split_dataset(videos, self.options.seed);
        for split in Split::ALL {
            for video in plan.get(split) {
                summary.counts_mut(split).videos += 1;
                let mut seen = 0;
                let result = self.export_video(video, &mut seen, |sample| {
                    write_sample(&root, split, &sample, summary.counts_mut(split))
                });
                summary.frames_seen += seen;
                if let Err(e) = result {
                    summary.videos_skipped += 1;
                    log::warn!("skipping {}: {:#}", video.path.display(), e);
                }
            }
        }
        Ok(())
    }

    fn export_by_frame(
        &mut self,
        videos: Vec<LabeledVideo>,
        summary: &mut ExportSummary,
    ) -> Result<()> {
        let mut samples: Vec<(usize, Sample)> = Vec::new();
        for (ordinal, video) in videos.iter().enumerate() {
            let mut seen = 0;
            let result = self.export_video(video, &mut seen, |sample| {
                samples.push((ordinal, sample));
                Ok(())
            });
            summary.frames_seen += seen;
            if let Err(e) = result {
                summary.videos_skipped += 1;
                log::warn!("skipping {}: {:#}", video.path.display(), e);
            }
        }

        let root = self.options.root.clone();
        let plan = split_dataset(samples, self.options.seed);
        for split in Split::ALL {
            let mut contributors = HashSet::new();
            for (ordinal, sample) in plan.get(split) {
                write_sample(&root, split, sample, summary.counts_mut(split))?;
                contributors.insert(*ordinal);
            }
            summary.counts_mut(split).videos = contributors.len();
        }
        Ok(())
    }

    fn export_video(
        &mut self,
        video: &LabeledVideo,
        frames_seen: &mut u64,
        emit: impl FnMut(Sample) -> Result<()>,
    ) -> Result<()> {
        let mut source = (self.opener)(&video.path)?;
        let result = self.export_frames(source.as_mut(), video, frames_seen, emit);
        source.close();
        result
    }

    /// Detect on every frame of `source` and hand each frame that yields at
    /// least one label line to `emit`.
    fn export_frames(
        &mut self,
        source: &mut dyn FrameSource,
        video: &LabeledVideo,
        frames_seen: &mut u64,
        mut emit: impl FnMut(Sample) -> Result<()>,
    ) -> Result<()> {
        let size = self.options.frame_size;
        loop {
            let frame = match source.next_frame() {
                Ok(Next::Frame(frame)) => frame,
                Ok(Next::EndOfStream) => break,
                Err(e) if e.is_recoverable() => {
                    log::warn!("{}: {}", video.path.display(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            *frames_seen += 1;

            let resized = image::imageops::resize(&frame.image, size, size, FilterType::Triangle);
            let frame = Frame::new(frame.index, resized);
            let detections = match self.detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    log::warn!("{}: {}", video.path.display(), e);
                    continue;
                }
            };

            let lines: Vec<String> = detections
                .iter()
                .filter(|d| d.confidence() > self.options.min_confidence)
                .map(|d| label_line(video.label.class_id(), d, size, size))
                .collect();
            if lines.is_empty() {
                continue;
            }

            // Frame numbers are 1-based, matching the decoder position after the read.
            emit(Sample {
                name: format!("{}_{}", video.name, frame.index + 1),
                image: frame.image,
                lines,
            })?;
        }
        Ok(())
    }
}

/// One kept frame: the resized image and its label lines.
struct Sample {
    name: String,
    image: RgbImage,
    lines: Vec<String>,
}

fn write_sample(
    root: &Path,
    split: Split,
    sample: &Sample,
    counts: &mut SplitCounts,
) -> Result<()> {
    let split_dir = root.join(split.dir_name());
    let image_path = split_dir.join("images").join(format!("{}.jpg", sample.name));
    let label_path = split_dir.join("labels").join(format!("{}.txt", sample.name));
    sample
        .image
        .save_with_format(&image_path, ImageFormat::Jpeg)
        .with_context(|| format!("write {}", image_path.display()))?;
    log::debug!("saved image {}", image_path.display());
    let mut body = sample.lines.join("\n");
    body.push('\n');
    std::fs::write(&label_path, body).with_context(|| format!("write {}", label_path.display()))?;
    log::debug!("saved label {}", label_path.display());

    counts.images += 1;
    counts.labels += 1;
    Ok(())
}

/// Run an external trainer on the manifest.
///
/// `{data}` in the command is replaced by the manifest path; without the
/// placeholder the path is appended as `data=<path>`.
pub fn run_trainer(command: &str, manifest: &Path) -> Result<()> {
    let data = manifest.display().to_string();
    let mut args: Vec<String> = if command.contains("{data}") {
        command
            .split_whitespace()
            .map(|part| part.replace("{data}", &data))
            .collect()
    } else {
        let mut args: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        args.push(format!("data={}", data));
        args
    };
    if args.is_empty() {
        return Err(anyhow!("trainer command is empty"));
    }
    let program = args.remove(0);
    log::info!("running trainer: {} {}", program, args.join(" "));
    let status = Command::new(&program)
        .args(&args)
        .status()
        .with_context(|| format!("spawn trainer '{}'", program))?;
    if !status.success() {
        return Err(anyhow!("trainer exited with {}", status));
    }
    Ok(())
}

/// Delete the dataset root.
pub fn cleanup(root: &Path) -> Result<()> {
    if root.exists() {
        std::fs::remove_dir_all(root).with_context(|| format!("remove {}", root.display()))?;
        log::info!("removed temporary dataset {}", root.display());
    }
    Ok(())
}
