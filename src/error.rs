//! Error taxonomy for the frame pipeline.
//!
//! Only `ModelLoad` and `Config` are fatal, and only at startup. Everything the
//! playback loop can hit while running is recoverable per frame.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad path, unsupported scheme or unreachable stream. The loop never starts.
    #[error("source unavailable: {source_id}: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// A single frame could not be read or decoded. The stream stays open.
    #[error("decode failure at frame {frame}: {reason}")]
    DecodeFailure { frame: u64, reason: String },

    /// The detector call failed for one frame. The raw frame is passed through.
    #[error("inference failure at frame {frame}: {reason}")]
    InferenceFailure { frame: u64, reason: String },

    /// Writing an output frame failed. Logged and ignored by the loop.
    #[error("persist failure for {path}: {reason}")]
    PersistFailure { path: String, reason: String },

    /// The detector model artifact could not be loaded.
    #[error("failed to load detector model {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The inference worker thread is gone. Ends the session.
    #[error("inference worker stopped: {0}")]
    WorkerStopped(String),
}

impl PipelineError {
    pub fn source_unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(frame: u64, reason: impl ToString) -> Self {
        Self::DecodeFailure {
            frame,
            reason: reason.to_string(),
        }
    }

    pub fn inference(frame: u64, reason: impl ToString) -> Self {
        Self::InferenceFailure {
            frame,
            reason: reason.to_string(),
        }
    }

    /// True for errors that only affect the current frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DecodeFailure { .. } | Self::InferenceFailure { .. } | Self::PersistFailure { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
