use crate::detector::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NMS_THRESHOLD};
use std::path::PathBuf;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
pub const SWAPPER_MODEL_FILE: &str = "inswapper_128_fp16.onnx";

/// Where the swap model can be downloaded from when it is missing.
pub const SWAPPER_MODEL_URL: &str =
    "https://huggingface.co/hacksider/deep-live-cam/resolve/main/inswapper_128_fp16.onnx";

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Model locations and inference settings shared by every request.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Explicit swap model path; defaults to `model_dir/inswapper_128_fp16.onnx`.
    pub swapper_model: Option<PathBuf>,
    pub det_threshold: f32,
    pub nms_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    pub jpeg_quality: u8,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            swapper_model: None,
            det_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            intra_threads: 2,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ModelConfig {
    pub fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Self::default()
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(RECOGNIZER_MODEL_FILE)
    }

    /// Path to the inswapper model.
    pub fn swapper_model_path(&self) -> PathBuf {
        self.swapper_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(SWAPPER_MODEL_FILE))
    }
}

/// `FACESWAP_MODEL_DIR` if set, otherwise `models` relative to the working directory.
pub fn default_model_dir() -> PathBuf {
    std::env::var_os("FACESWAP_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths() {
        let config = ModelConfig::with_model_dir("/opt/faceswap");
        assert_eq!(config.detector_model_path(), PathBuf::from("/opt/faceswap/det_10g.onnx"));
        assert_eq!(config.recognizer_model_path(), PathBuf::from("/opt/faceswap/w600k_r50.onnx"));
        assert_eq!(
            config.swapper_model_path(),
            PathBuf::from("/opt/faceswap/inswapper_128_fp16.onnx")
        );
    }

    #[test]
    fn test_swapper_override() {
        let config = ModelConfig {
            swapper_model: Some(PathBuf::from("/tmp/custom.onnx")),
            ..ModelConfig::with_model_dir("models")
        };
        assert_eq!(config.swapper_model_path(), PathBuf::from("/tmp/custom.onnx"));
        assert_eq!(config.detector_model_path(), PathBuf::from("models/det_10g.onnx"));
    }
}
