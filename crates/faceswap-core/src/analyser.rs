//! Face analysis: detection plus identity embedding for every detected face.

use crate::config::ModelConfig;
use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::lazy::LazyModel;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Face, FaceSet};
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyserError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("detector: {0}")]
    Detector(DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(RecognizerError),
}

impl From<DetectorError> for AnalyserError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(path) => Self::ModelNotFound(path),
            other => Self::Detector(other),
        }
    }
}

impl From<RecognizerError> for AnalyserError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(path) => Self::ModelNotFound(path),
            other => Self::Recognizer(other),
        }
    }
}

/// Finds faces in a decoded image.
///
/// Zero faces is an empty set, not an error. Errors are reserved for
/// missing models and inference faults.
pub trait FaceAnalyser: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<FaceSet, AnalyserError>;

    /// Whether the underlying models are resident.
    fn is_loaded(&self) -> bool {
        false
    }
}

struct AnalyserModels {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

/// SCRFD + ArcFace analyser, loaded on first use.
pub struct OnnxFaceAnalyser {
    detector_path: PathBuf,
    recognizer_path: PathBuf,
    options: DetectorOptions,
    models: LazyModel<AnalyserModels>,
}

impl OnnxFaceAnalyser {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            detector_path: config.detector_model_path(),
            recognizer_path: config.recognizer_model_path(),
            options: DetectorOptions {
                confidence_threshold: config.det_threshold,
                nms_threshold: config.nms_threshold,
                intra_threads: config.intra_threads,
            },
            models: LazyModel::new("analyser"),
        }
    }

    fn load(&self) -> Result<AnalyserModels, AnalyserError> {
        let detector = FaceDetector::load(&self.detector_path, self.options)?;
        let recognizer = FaceRecognizer::load(&self.recognizer_path, self.options.intra_threads)?;
        Ok(AnalyserModels { detector, recognizer })
    }
}

impl FaceAnalyser for OnnxFaceAnalyser {
    fn detect(&self, image: &RgbImage) -> Result<FaceSet, AnalyserError> {
        self.models.with(
            || self.load(),
            |models| {
                let boxes = models.detector.detect(image)?;
                let mut faces = Vec::with_capacity(boxes.len());
                for bbox in boxes {
                    match models.recognizer.extract(image, &bbox) {
                        Ok(embedding) => faces.push(Face { bbox, embedding }),
                        Err(RecognizerError::NoLandmarks) => {
                            tracing::warn!(x = bbox.x, y = bbox.y, "skipping face without landmarks");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(faces)
            },
        )
    }

    fn is_loaded(&self) -> bool {
        self.models.is_loaded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_missing_models_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let analyser = OnnxFaceAnalyser::new(&ModelConfig::with_model_dir(dir.path()));
        let frame = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));

        match analyser.detect(&frame) {
            Err(AnalyserError::ModelNotFound(path)) => assert!(path.ends_with("det_10g.onnx")),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
        assert!(!analyser.is_loaded());
    }

    #[test]
    fn test_error_conversion_keeps_not_found() {
        let e: AnalyserError = RecognizerError::ModelNotFound("w600k_r50.onnx".into()).into();
        assert!(matches!(e, AnalyserError::ModelNotFound(_)));
        let e: AnalyserError = DetectorError::EmptyFrame.into();
        assert!(matches!(e, AnalyserError::Detector(DetectorError::EmptyFrame)));
    }
}
