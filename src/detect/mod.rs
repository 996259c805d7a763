mod backend;
mod backends;
mod detector;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptedBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use detector::{load_detector, Detector};
pub use result::{non_max_suppression, ClassNames, Detection, RawDetection};
