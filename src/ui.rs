//! Stage and progress reporting on stderr.
//!
//! On a terminal, stages get an indicatif spinner; otherwise they print plain
//! `==> stage` lines so logs stay greppable.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use image::RgbImage;
use std::time::{Duration, Instant};

use crate::error::PipelineResult;
use crate::playback::{FrameReport, FrameSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    fn spinner(&self, message: String) -> Option<ProgressBar> {
        if !self.use_pretty() {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        Some(spinner)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.spinner(format!("{name}…"));
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard::new(name.to_string(), spinner)
    }

    /// Sink that keeps a running frame / alert count on the spinner.
    pub fn frame_counter(&self, source: &str) -> FrameCounter {
        FrameCounter {
            label: source.to_string(),
            spinner: self.spinner(format!("{source}: waiting for frames")),
            frames: 0,
            alerts: 0,
            start: Instant::now(),
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameCounter {
    label: String,
    spinner: Option<ProgressBar>,
    frames: u64,
    alerts: u64,
    start: Instant,
}

impl FrameCounter {
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn alerts(&self) -> u64 {
        self.alerts
    }
}

impl FrameSink for FrameCounter {
    fn name(&self) -> &'static str {
        "progress"
    }

    fn emit(&mut self, report: &FrameReport, _image: &RgbImage) -> PipelineResult<()> {
        self.frames += 1;
        if report.verdict.alert {
            self.alerts += 1;
        }
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{}: {} frames, {} alerts",
                self.label, self.frames, self.alerts
            ));
        }
        Ok(())
    }

    fn finish(&mut self) {
        let message = format!(
            "✔ {}: {} frames, {} alerts ({})",
            self.label,
            self.frames,
            self.alerts,
            format_duration(self.start.elapsed())
        );
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
