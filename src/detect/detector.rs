use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::StubBackend;
use crate::detect::result::{ClassNames, Detection};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// A loaded detection model: one backend plus its class-name table.
///
/// Built once at startup and passed into whatever needs it. Every detection
/// leaving `detect` has been validated.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    names: ClassNames,
}

impl Detector {
    pub fn new<B: DetectorBackend + 'static>(backend: B, names: ClassNames) -> Self {
        Self {
            backend: Box::new(backend),
            names,
        }
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>, names: ClassNames) -> Self {
        Self { backend, names }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn names(&self) -> &ClassNames {
        &self.names
    }

    pub fn warm_up(&mut self) -> PipelineResult<()> {
        let name = self.backend.name();
        self.backend
            .warm_up()
            .map_err(|e| PipelineError::ModelLoad {
                path: name.to_string(),
                reason: format!("{:#}", e),
            })
    }

    /// Run the backend on one frame and validate what it returns.
    ///
    /// A backend error or any malformed box fails the whole frame.
    pub fn detect(&mut self, frame: &Frame) -> PipelineResult<Vec<Detection>> {
        let raw = self
            .backend
            .detect(frame)
            .map_err(|e| PipelineError::inference(frame.index, format!("{:#}", e)))?;
        raw.into_iter()
            .map(|r| {
                Detection::try_from(r).map_err(|e| PipelineError::inference(frame.index, e))
            })
            .collect()
    }
}

/// Construct the detector named by the settings. Any failure here is fatal.
pub fn load_detector(settings: &DetectorSettings) -> PipelineResult<Detector> {
    let names = ClassNames::new(settings.class_names.iter().cloned());
    let mut detector = match settings.backend.as_str() {
        "stub" => Detector::new(StubBackend::new(), names),
        "tract" => load_tract(settings, names)?,
        other => {
            return Err(PipelineError::Config(format!(
                "unknown detector backend '{}'",
                other
            )))
        }
    };
    detector.warm_up()?;
    log::info!(
        "detector ready: backend={} classes={}",
        detector.backend_name(),
        detector.names().len()
    );
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &DetectorSettings, names: ClassNames) -> PipelineResult<Detector> {
    use crate::detect::backends::TractBackend;

    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| PipelineError::Config("tract backend requires model_path".into()))?;
    let backend = TractBackend::new(path, settings.input_size)
        .map_err(|e| PipelineError::ModelLoad {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        })?
        .with_iou_threshold(settings.iou_threshold);
    Ok(Detector::new(backend, names))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(settings: &DetectorSettings, _names: ClassNames) -> PipelineResult<Detector> {
    Err(PipelineError::ModelLoad {
        path: settings
            .model_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        reason: "tract backend requires the backend-tract feature".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawDetection, ScriptedBackend};
    use image::RgbImage;

    fn names() -> ClassNames {
        ClassNames::new(["normal", "shoplifting"])
    }

    #[test]
    fn detector_rejects_malformed_backend_output() {
        let backend = ScriptedBackend::new()
            .on_frame(0, vec![RawDetection::new(5.0, 5.0, 1.0, 1.0, 1, 0.9)]);
        let mut detector = Detector::new(backend, names());
        let err = detector
            .detect(&Frame::new(0, RgbImage::new(8, 8)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InferenceFailure { frame: 0, .. }));
    }

    #[test]
    fn detector_maps_backend_errors_to_inference_failure() {
        let mut detector = Detector::new(ScriptedBackend::new().fail_on(3), names());
        let err = detector
            .detect(&Frame::new(3, RgbImage::new(8, 8)))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InferenceFailure { frame: 3, .. }));
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let settings = DetectorSettings {
            backend: "quantum".into(),
            ..DetectorSettings::default()
        };
        assert!(matches!(
            load_detector(&settings),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn stub_backend_loads_without_model() {
        let detector = load_detector(&DetectorSettings::default()).expect("stub detector");
        assert_eq!(detector.backend_name(), "stub");
        assert_eq!(detector.names().name(1), "shoplifting");
    }
}
