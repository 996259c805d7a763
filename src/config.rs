use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::AnnotationStyle;
use crate::decision::{AlertClassRule, DecisionRule, PersonCountRule};
use crate::detect::ClassNames;

const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_CLASS_NAMES: [&str; 2] = ["normal", "shoplifting"];
const DEFAULT_ALERT_CLASS: &str = "shoplifting";
const DEFAULT_THRESHOLD: f32 = AlertClassRule::DEFAULT_THRESHOLD;
const DEFAULT_MIN_COUNT: usize = 1;
const DEFAULT_TICK_INTERVAL_MS: u64 = 10;
const DEFAULT_GIF_DELAY_MS: u64 = 100;
const DEFAULT_OUTPUT_DIR: &str = "tested";

#[derive(Debug, Deserialize, Default)]
struct WatchConfigFile {
    detector: Option<DetectorConfigFile>,
    decision: Option<DecisionConfigFile>,
    annotation: Option<AnnotationStyle>,
    playback: Option<PlaybackConfigFile>,
    output: Option<OutputConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DecisionConfigFile {
    rule: Option<String>,
    alert_class: Option<String>,
    threshold: Option<f32>,
    min_count: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PlaybackConfigFile {
    tick_interval_ms: Option<u64>,
    gif_delay_ms: Option<u64>,
    use_worker: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    output_dir: Option<PathBuf>,
    persist: Option<bool>,
    image_format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub detector: DetectorSettings,
    pub decision: DecisionSettings,
    pub annotation: AnnotationStyle,
    pub playback: PlaybackSettings,
    pub output: OutputSettings,
    pub stream_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub iou_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    AlertClass,
    PersonCount,
}

impl RuleKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "alert_class" => Ok(Self::AlertClass),
            "person_count" => Ok(Self::PersonCount),
            other => Err(anyhow!(
                "unknown decision rule '{}' (expected alert_class or person_count)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionSettings {
    pub rule: RuleKind,
    /// Class name (or numeric id) the rule watches.
    pub alert_class: String,
    pub threshold: f32,
    pub min_count: usize,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            rule: RuleKind::AlertClass,
            alert_class: DEFAULT_ALERT_CLASS.to_string(),
            threshold: DEFAULT_THRESHOLD,
            min_count: DEFAULT_MIN_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub tick_interval: Duration,
    pub gif_delay: Duration,
    /// Run detection on a dedicated worker thread.
    pub use_worker: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            gif_delay: Duration::from_millis(DEFAULT_GIF_DELAY_MS),
            use_worker: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(anyhow!("unsupported image format '{}'", other)),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub output_dir: PathBuf,
    pub persist: bool,
    pub image_format: FrameFormat,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            persist: true,
            image_format: FrameFormat::Jpeg,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            detector: DetectorSettings::default(),
            decision: DecisionSettings::default(),
            annotation: AnnotationStyle::default(),
            playback: PlaybackSettings::default(),
            output: OutputSettings::default(),
            stream_url: None,
        }
    }
}

impl WatchConfig {
    /// Defaults, then the file named by `SHOPLIFT_CONFIG`, then environment
    /// overrides. CLI flags are layered on top by the binaries, which call
    /// `validate` again afterwards.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SHOPLIFT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.detector.backend),
            model_path: detector_file.model_path,
            input_size: detector_file
                .input_size
                .unwrap_or(defaults.detector.input_size),
            class_names: detector_file
                .class_names
                .unwrap_or(defaults.detector.class_names),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(defaults.detector.iou_threshold),
        };

        let decision_file = file.decision.unwrap_or_default();
        let decision = DecisionSettings {
            rule: match decision_file.rule.as_deref() {
                Some(rule) => RuleKind::parse(rule)?,
                None => defaults.decision.rule,
            },
            alert_class: decision_file
                .alert_class
                .unwrap_or(defaults.decision.alert_class),
            threshold: decision_file
                .threshold
                .unwrap_or(defaults.decision.threshold),
            min_count: decision_file
                .min_count
                .unwrap_or(defaults.decision.min_count),
        };

        let playback_file = file.playback.unwrap_or_default();
        let playback = PlaybackSettings {
            tick_interval: playback_file
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.playback.tick_interval),
            gif_delay: playback_file
                .gif_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.playback.gif_delay),
            use_worker: playback_file
                .use_worker
                .unwrap_or(defaults.playback.use_worker),
        };

        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            output_dir: output_file
                .output_dir
                .unwrap_or(defaults.output.output_dir),
            persist: output_file.persist.unwrap_or(defaults.output.persist),
            image_format: match output_file.image_format.as_deref() {
                Some(format) => FrameFormat::parse(format)?,
                None => defaults.output.image_format,
            },
        };

        Ok(Self {
            detector,
            decision,
            annotation: file.annotation.unwrap_or(defaults.annotation),
            playback,
            output,
            stream_url: file.stream.and_then(|stream| stream.url),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SHOPLIFT_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(backend) = std::env::var("SHOPLIFT_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("SHOPLIFT_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(threshold) = std::env::var("SHOPLIFT_THRESHOLD") {
            self.decision.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("SHOPLIFT_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Ok(class) = std::env::var("SHOPLIFT_ALERT_CLASS") {
            if !class.trim().is_empty() {
                self.decision.alert_class = class.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("SHOPLIFT_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream_url = Some(url.trim().to_string());
            }
        }
        if let Ok(persist) = std::env::var("SHOPLIFT_PERSIST") {
            self.output.persist = parse_bool(&persist)
                .ok_or_else(|| anyhow!("SHOPLIFT_PERSIST must be true or false"))?;
        }
        if let Ok(names) = std::env::var("SHOPLIFT_CLASS_NAMES") {
            let parsed = split_csv(&names);
            if !parsed.is_empty() {
                self.detector.class_names = parsed;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.decision.threshold) {
            return Err(anyhow!(
                "threshold must be within [0, 1], got {}",
                self.decision.threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!(
                "iou_threshold must be within [0, 1], got {}",
                self.detector.iou_threshold
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("input_size must be greater than zero"));
        }
        if self.detector.class_names.is_empty() {
            return Err(anyhow!("class_names must not be empty"));
        }
        if self.playback.gif_delay.is_zero() {
            return Err(anyhow!("gif_delay_ms must be greater than zero"));
        }
        self.alert_class_id()?;
        Ok(())
    }

    pub fn class_names(&self) -> ClassNames {
        ClassNames::new(self.detector.class_names.iter().cloned())
    }

    /// Resolve the configured alert class to an id: a class name from
    /// `class_names`, or a numeric id within range.
    pub fn alert_class_id(&self) -> Result<u32> {
        let names = self.class_names();
        if let Some(id) = names.id_of(&self.decision.alert_class) {
            return Ok(id);
        }
        match self.decision.alert_class.parse::<u32>() {
            Ok(id) if (id as usize) < names.len() => Ok(id),
            _ => Err(anyhow!(
                "alert class '{}' is not one of {:?}",
                self.decision.alert_class,
                self.detector.class_names
            )),
        }
    }

    pub fn build_rule(&self) -> Result<Box<dyn DecisionRule>> {
        let class_id = self.alert_class_id()?;
        let rule: Box<dyn DecisionRule> = match self.decision.rule {
            RuleKind::AlertClass => Box::new(AlertClassRule::new(class_id, self.decision.threshold)),
            RuleKind::PersonCount => Box::new(PersonCountRule::new(
                class_id,
                self.decision.threshold,
                self.decision.min_count,
            )),
        };
        Ok(rule)
    }
}

fn read_config_file(path: &Path) -> Result<WatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
