use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The model behind a backend is opaque: the pipeline only hands it one frame
/// at a time and takes back raw boxes. Validation of those boxes happens in
/// [`crate::detect::Detector`], not here.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Returned coordinates are in the frame's pixel space. The frame is
    /// borrowed for the duration of the call only.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once at startup.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
