//! Network stream source (RTSP / HTTP).
//!
//! Uses GStreamer for decode when the `rtsp-gstreamer` feature is enabled.
//! A stream has no natural end: a stall or a transient pipeline error is
//! reported as a `DecodeFailure` for that tick and the next call tries again.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;

use super::{FrameSource, Next, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
#[cfg(feature = "rtsp-gstreamer")]
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Stream URL (e.g., "rtsp://192.168.1.100:554/stream").
    pub url: String,
    /// Expected frame rate; sets how long a pull may block before it counts
    /// as a stall.
    pub target_fps: u32,
    /// Transport latency in milliseconds handed to the depayloader.
    pub latency_ms: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            latency_ms: 0,
        }
    }
}

impl RtspConfig {
    /// How long one pull waits for a sample.
    pub fn frame_timeout_ms(&self) -> u64 {
        let base_ms = if self.target_fps == 0 {
            500
        } else {
            (1000 / self.target_fps).saturating_mul(4)
        };
        base_ms.max(500) as u64
    }
}

/// Continuous frame source over a network stream.
pub struct RtspSource {
    config: RtspConfig,
    #[cfg(feature = "rtsp-gstreamer")]
    backend: Option<GstreamerStream>,
    next_index: u64,
    stats: SourceStats,
    closed: bool,
}

impl RtspSource {
    /// Build the pipeline and start it playing.
    pub fn open(config: RtspConfig) -> PipelineResult<Self> {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            let backend = GstreamerStream::start(&config)
                .map_err(|e| PipelineError::source_unavailable(&config.url, format!("{:#}", e)))?;
            log::info!("RtspSource: connected to {}", config.url);
            Ok(Self {
                stats: SourceStats {
                    source: config.url.clone(),
                    ..SourceStats::default()
                },
                config,
                backend: Some(backend),
                next_index: 0,
                closed: false,
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(PipelineError::source_unavailable(
                config.url,
                "network streams require the rtsp-gstreamer feature",
            ))
        }
    }

    pub fn config(&self) -> &RtspConfig {
        &self.config
    }
}

impl FrameSource for RtspSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Stream
    }

    fn source_id(&self) -> &str {
        &self.config.url
    }

    fn next_frame(&mut self) -> PipelineResult<Next> {
        if self.closed {
            return Ok(Next::EndOfStream);
        }
        let index = self.next_index;
        self.next_index += 1;

        #[cfg(feature = "rtsp-gstreamer")]
        let result = match self.backend.as_mut() {
            Some(stream) => stream
                .pull(index, self.config.frame_timeout_ms())
                .map(Next::Frame),
            None => Ok(Next::EndOfStream),
        };
        #[cfg(not(feature = "rtsp-gstreamer"))]
        let result: PipelineResult<Next> =
            Err(PipelineError::decode(index, "stream backend not compiled in"));

        match &result {
            Ok(Next::Frame(_)) => self.stats.frames_read += 1,
            Err(e) => {
                self.stats.decode_failures += 1;
                log::warn!("RtspSource: {}", e);
            }
            _ => {}
        }
        result
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        #[cfg(feature = "rtsp-gstreamer")]
        if let Some(stream) = self.backend.take() {
            stream.stop();
        }
        log::info!("RtspSource: closed {}", self.config.url);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// GStreamer pipeline
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStream {
    fn start(config: &RtspConfig) -> anyhow::Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let source = if config.url.starts_with("rtsp") {
            format!(
                "rtspsrc location={} latency={}",
                config.url, config.latency_ms
            )
        } else {
            format!("souphttpsrc location={} is-live=true", config.url)
        };
        let pipeline_description = format!(
            "{} ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            source
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;

        Ok(Self { pipeline, appsink })
    }

    fn pull(&mut self, index: u64, timeout_ms: u64) -> PipelineResult<Frame> {
        if let Some(reason) = self.poll_bus() {
            return Err(PipelineError::decode(index, reason));
        }
        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout_ms))
            .ok_or_else(|| PipelineError::decode(index, "stream stalled"))?;
        sample_to_frame(index, &sample).map_err(|e| PipelineError::decode(index, format!("{:#}", e)))
    }

    /// Drain pending bus messages and return the last error, if any.
    fn poll_bus(&self) -> Option<String> {
        use gstreamer::prelude::*;

        let bus = self.pipeline.bus()?;
        let mut last_error = None;
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    last_error = Some("stream reached EOS".to_string());
                }
                _ => {}
            }
        }
        last_error
    }

    fn stop(self) {
        use gstreamer::prelude::*;

        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop pipeline: {}", e);
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_frame(index: u64, sample: &gstreamer::Sample) -> anyhow::Result<Frame> {
    let buffer = sample.buffer().context("stream sample missing buffer")?;
    let caps = sample.caps().context("stream sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse stream caps as video info")?;

    let map = buffer.map_readable().context("map stream buffer")?;
    Frame::from_strided_rgb(
        index,
        map.as_slice(),
        info.stride()[0] as usize,
        info.width(),
        info.height(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timeout_has_a_floor() {
        let config = RtspConfig {
            target_fps: 30,
            ..RtspConfig::default()
        };
        assert_eq!(config.frame_timeout_ms(), 500);
        let config = RtspConfig {
            target_fps: 2,
            ..RtspConfig::default()
        };
        assert_eq!(config.frame_timeout_ms(), 2000);
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn streams_need_gstreamer_feature() {
        let result = RtspSource::open(RtspConfig::default());
        assert!(matches!(
            result,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }
}
