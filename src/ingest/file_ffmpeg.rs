//! FFmpeg-backed video file decoder.
//!
//! Packets are read until the decoder yields a frame. Once the container runs
//! dry the decoder is flushed, and the buffered frames drain before
//! `EndOfStream` is reported.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::Next;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    next_index: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            next_index: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> PipelineResult<Next> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Next::Frame(frame));
            }
            if self.eof_sent {
                return Ok(Next::EndOfStream);
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        let index = self.next_index;
                        self.next_index += 1;
                        return Err(PipelineError::decode(index, e));
                    }
                }
                None => {
                    self.eof_sent = true;
                    if let Err(e) = self.decoder.send_eof() {
                        log::warn!("ffmpeg: flushing decoder failed: {}", e);
                    }
                }
            }
        }
    }

    /// Pull one decoded frame, if the decoder has one ready.
    fn receive(&mut self) -> PipelineResult<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;

        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb)
            .map_err(|e| PipelineError::decode(index, format!("scale frame to RGB: {}", e)))?;
        Frame::from_strided_rgb(index, rgb.data(0), rgb.stride(0), rgb.width(), rgb.height())
            .map(Some)
            .map_err(|e| PipelineError::decode(index, format!("{:#}", e)))
    }
}
