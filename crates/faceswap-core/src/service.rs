//! Process-wide owner of the face models.
//!
//! One `SwapService` is built at startup and shared by every request. It
//! owns the analyser and the swapper, each behind its own lazy slot and
//! lock, and turns every request outcome, panics included, into a
//! [`SwapResult`].

use crate::analyser::{AnalyserError, FaceAnalyser, OnnxFaceAnalyser};
use crate::codec;
use crate::config::ModelConfig;
use crate::pipeline::{PipelineError, SwapPipeline};
use crate::swapper::{FaceSwapper, InSwapper};
use crate::types::{ErrorKind, FaceSet, SwapRequest, SwapResult};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Snapshot of model state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub swap_model_path: PathBuf,
    pub model_present: bool,
    pub analyser_loaded: bool,
    pub swapper_loaded: bool,
}

pub struct SwapService {
    config: ModelConfig,
    analyser: Box<dyn FaceAnalyser>,
    swapper: Box<dyn FaceSwapper>,
}

impl SwapService {
    /// Service backed by the ONNX models named in `config`.
    pub fn new(config: ModelConfig) -> Self {
        let analyser = OnnxFaceAnalyser::new(&config);
        let swapper = InSwapper::new(config.swapper_model_path(), config.intra_threads);
        Self::with_models(config, Box::new(analyser), Box::new(swapper))
    }

    /// Service over caller-supplied analyser and swapper implementations.
    pub fn with_models(config: ModelConfig, analyser: Box<dyn FaceAnalyser>, swapper: Box<dyn FaceSwapper>) -> Self {
        Self {
            config,
            analyser,
            swapper,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Run one swap request to completion on the calling thread.
    pub fn process(&self, request: &SwapRequest) -> SwapResult {
        let pipeline = SwapPipeline::new(self.analyser.as_ref(), self.swapper.as_ref(), self.config.jpeg_quality);
        match panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(request))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(reason = %reason, "swap pipeline panicked");
                SwapResult::failed(ErrorKind::UnexpectedFailure, reason)
            }
        }
    }

    /// Detect every face in the image at `path`.
    pub fn detect_faces(&self, path: &Path) -> Result<FaceSet, PipelineError> {
        let image = codec::load_image(path).map_err(PipelineError::ImageLoad)?;
        self.analyser.detect(&image).map_err(|e| match e {
            AnalyserError::ModelNotFound(path) => PipelineError::ModelUnavailable(path),
            other => PipelineError::Unexpected(other.to_string()),
        })
    }

    pub fn status(&self) -> ServiceStatus {
        let swap_model_path = self.config.swapper_model_path();
        ServiceStatus {
            model_present: swap_model_path.exists(),
            swap_model_path,
            analyser_loaded: self.analyser.is_loaded(),
            swapper_loaded: self.swapper.is_loaded(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic during swap".to_string()
    }
}
