//! The swap state machine for a single request.
//!
//! Preflight → Load → Detect-source → Detect-target → Swap → Persist.
//! Every stage either advances or ends the request with one [`ErrorKind`].
//! Nothing is retried and nothing is written unless every stage succeeded.

use crate::analyser::{AnalyserError, FaceAnalyser};
use crate::codec::{self, CodecError};
use crate::selector;
use crate::swapper::{FaceSwapper, SwapError};
use crate::types::{ErrorKind, Face, FaceSet, SwapRequest, SwapResult};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not load image: {0}")]
    ImageLoad(#[source] CodecError),
    #[error("no face found in source image")]
    NoSourceFace,
    #[error("no face found in target image")]
    NoTargetFace,
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("could not write output: {0}")]
    OutputWrite(#[source] CodecError),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ImageLoad(_) => ErrorKind::ImageLoadError,
            PipelineError::NoSourceFace => ErrorKind::NoSourceFace,
            PipelineError::NoTargetFace => ErrorKind::NoTargetFace,
            PipelineError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            PipelineError::OutputWrite(_) => ErrorKind::OutputWriteError,
            PipelineError::Unexpected(_) => ErrorKind::UnexpectedFailure,
        }
    }
}

impl From<SwapError> for PipelineError {
    fn from(e: SwapError) -> Self {
        match e {
            SwapError::ModelUnavailable(path) => PipelineError::ModelUnavailable(path),
            other => PipelineError::Unexpected(other.to_string()),
        }
    }
}

/// One request's worth of orchestration over shared model handles.
pub struct SwapPipeline<'a> {
    analyser: &'a dyn FaceAnalyser,
    swapper: &'a dyn FaceSwapper,
    jpeg_quality: u8,
}

impl<'a> SwapPipeline<'a> {
    pub fn new(analyser: &'a dyn FaceAnalyser, swapper: &'a dyn FaceSwapper, jpeg_quality: u8) -> Self {
        Self {
            analyser,
            swapper,
            jpeg_quality,
        }
    }

    /// Run the request and fold the outcome into a [`SwapResult`].
    pub fn process(&self, request: &SwapRequest) -> SwapResult {
        match self.run(request) {
            Ok(path) => SwapResult::succeeded(path),
            Err(e) => {
                tracing::warn!(
                    kind = %e.kind(),
                    source = %request.source_path.display(),
                    target = %request.target_path.display(),
                    error = %e,
                    "swap failed"
                );
                SwapResult::failed(e.kind(), e.to_string())
            }
        }
    }

    /// Run the request, returning the written output path.
    pub fn run(&self, request: &SwapRequest) -> Result<PathBuf, PipelineError> {
        self.swapper.prepare().map_err(|e| match e {
            SwapError::ModelUnavailable(path) => PipelineError::ModelUnavailable(path),
            other => PipelineError::ModelUnavailable(other.to_string()),
        })?;

        let source_image = codec::load_image(&request.source_path).map_err(PipelineError::ImageLoad)?;
        let target_image = codec::load_image(&request.target_path).map_err(PipelineError::ImageLoad)?;
        tracing::debug!(
            source = ?source_image.dimensions(),
            target = ?target_image.dimensions(),
            "images loaded"
        );

        let source_faces = self.detect(&source_image, "source")?;
        let source_face = selector::select_one(&source_faces).ok_or(PipelineError::NoSourceFace)?;

        let target_faces = self.detect(&target_image, "target")?;
        let targets: Vec<Face> = if request.many_faces {
            selector::select_many(target_faces)
        } else {
            selector::select_one(&target_faces).cloned().into_iter().collect()
        };
        if targets.is_empty() {
            return Err(PipelineError::NoTargetFace);
        }
        tracing::debug!(targets = targets.len(), many_faces = request.many_faces, "faces selected");

        let mut frame = target_image;
        for (i, target_face) in targets.iter().enumerate() {
            frame = self.swapper.swap(source_face, target_face, &frame)?;
            tracing::debug!(face = i, "face swapped");
        }

        self.persist(&frame, &request.output_path)?;
        Ok(request.output_path.clone())
    }

    fn detect(&self, image: &RgbImage, role: &'static str) -> Result<FaceSet, PipelineError> {
        match self.analyser.detect(image) {
            Ok(faces) => {
                tracing::debug!(role, faces = faces.len(), "detection done");
                Ok(faces)
            }
            Err(AnalyserError::ModelNotFound(path)) => Err(PipelineError::ModelUnavailable(path)),
            Err(e) => {
                tracing::warn!(role, error = %e, "face analysis failed; treating as no faces");
                Ok(FaceSet::new())
            }
        }
    }

    fn persist(&self, frame: &RgbImage, path: &Path) -> Result<(), PipelineError> {
        codec::save_jpeg(frame, path, self.jpeg_quality).map_err(PipelineError::OutputWrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::types::{BoundingBox, Embedding};
    use image::Rgb;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn face_at(x: f32) -> Face {
        Face {
            bbox: BoundingBox {
                x,
                y: 2.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.9,
                landmarks: Some([(2.0, 3.0), (6.0, 3.0), (4.0, 5.0), (2.0, 7.0), (6.0, 7.0)]),
            },
            embedding: Embedding {
                values: vec![x],
                model_version: None,
            },
        }
    }

    #[derive(Clone, Copy)]
    enum AnalyserFailure {
        MissingModel,
        Fault,
    }

    /// Returns canned faces keyed on image dimensions.
    #[derive(Default)]
    struct FakeAnalyser {
        faces: HashMap<(u32, u32), FaceSet>,
        fail_with: Option<AnalyserFailure>,
    }

    impl FakeAnalyser {
        fn with(mut self, dims: (u32, u32), faces: FaceSet) -> Self {
            self.faces.insert(dims, faces);
            self
        }
    }

    impl FaceAnalyser for FakeAnalyser {
        fn detect(&self, image: &RgbImage) -> Result<FaceSet, AnalyserError> {
            match self.fail_with {
                Some(AnalyserFailure::MissingModel) => {
                    return Err(AnalyserError::ModelNotFound("models/det_10g.onnx".into()))
                }
                Some(AnalyserFailure::Fault) => return Err(AnalyserError::Detector(DetectorError::EmptyFrame)),
                None => {}
            }
            Ok(self.faces.get(&image.dimensions()).cloned().unwrap_or_default())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct SwapCall {
        source_x: f32,
        target_x: f32,
        /// Red channel of pixel (0, 0) in the frame handed to this call.
        frame_marker: u8,
    }

    /// Bumps pixel (0, 0) on every call so frame threading is observable.
    #[derive(Default)]
    struct FakeSwapper {
        unavailable: bool,
        calls: Mutex<Vec<SwapCall>>,
    }

    impl FakeSwapper {
        fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<SwapCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FaceSwapper for FakeSwapper {
        fn prepare(&self) -> Result<(), SwapError> {
            if self.unavailable {
                return Err(SwapError::ModelUnavailable("models/inswapper_128_fp16.onnx".into()));
            }
            Ok(())
        }

        fn swap(&self, source: &Face, target: &Face, frame: &RgbImage) -> Result<RgbImage, SwapError> {
            self.prepare()?;
            let marker = frame.get_pixel(0, 0)[0];
            self.calls.lock().unwrap().push(SwapCall {
                source_x: source.bbox.x,
                target_x: target.bbox.x,
                frame_marker: marker,
            });
            let mut out = frame.clone();
            out.put_pixel(0, 0, Rgb([marker + 1, 0, 0]));
            Ok(out)
        }
    }

    const SOURCE_DIMS: (u32, u32) = (20, 20);
    const TARGET_DIMS: (u32, u32) = (40, 30);

    struct Fixture {
        dir: TempDir,
        request: SwapRequest,
    }

    fn fixture(many_faces: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.png");
        let target = dir.path().join("target.png");
        RgbImage::new(SOURCE_DIMS.0, SOURCE_DIMS.1).save(&source).unwrap();
        RgbImage::new(TARGET_DIMS.0, TARGET_DIMS.1).save(&target).unwrap();
        let output = dir.path().join("results/out.jpg");
        let request = SwapRequest::new(source, target, output).many_faces(many_faces);
        Fixture { dir, request }
    }

    #[test]
    fn test_single_face_success_keeps_target_dimensions() {
        let fx = fixture(false);
        let analyser = FakeAnalyser::default()
            .with(SOURCE_DIMS, vec![face_at(5.0)])
            .with(TARGET_DIMS, vec![face_at(25.0), face_at(3.0)]);
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);

        assert!(result.success, "{result:?}");
        assert_eq!(result.output_path.as_deref(), Some(fx.request.output_path.as_path()));
        let written = codec::load_image(&fx.request.output_path).unwrap();
        assert_eq!(written.dimensions(), TARGET_DIMS);

        // Single mode swaps only the leftmost target face.
        let calls = swapper.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target_x, 3.0);
        assert_eq!(calls[0].source_x, 5.0);
    }

    #[test]
    fn test_many_faces_threads_frames_sequentially() {
        let fx = fixture(true);
        let analyser = FakeAnalyser::default()
            .with(SOURCE_DIMS, vec![face_at(9.0), face_at(1.0)])
            .with(TARGET_DIMS, vec![face_at(30.0), face_at(2.0), face_at(15.0)]);
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);
        assert!(result.success, "{result:?}");

        let calls = swapper.calls();
        assert_eq!(calls.len(), 3);
        // Detector order, each call seeing the previous call's output.
        let targets: Vec<f32> = calls.iter().map(|c| c.target_x).collect();
        assert_eq!(targets, vec![30.0, 2.0, 15.0]);
        let markers: Vec<u8> = calls.iter().map(|c| c.frame_marker).collect();
        assert_eq!(markers, vec![0, 1, 2]);
        // The same (leftmost) source face is used for every call.
        assert!(calls.iter().all(|c| c.source_x == 1.0));
    }

    #[test]
    fn test_no_source_face_never_swaps() {
        let fx = fixture(false);
        let analyser = FakeAnalyser::default().with(TARGET_DIMS, vec![face_at(3.0)]);
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::NoSourceFace));
        assert!(swapper.calls().is_empty());
        assert!(!fx.request.output_path.exists());
    }

    #[test]
    fn test_no_target_face_in_both_modes() {
        for many_faces in [false, true] {
            let fx = fixture(many_faces);
            let analyser = FakeAnalyser::default().with(SOURCE_DIMS, vec![face_at(5.0)]);
            let swapper = FakeSwapper::default();

            let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);

            assert_eq!(result.error_kind, Some(ErrorKind::NoTargetFace), "many_faces={many_faces}");
            assert!(result.output_path.is_none());
            assert!(swapper.calls().is_empty());
            assert!(!fx.request.output_path.exists());
            assert!(!fx.dir.path().join("results").exists());
        }
    }

    #[test]
    fn test_missing_swap_model_fails_every_request() {
        let swapper = FakeSwapper::unavailable();
        let analyser = FakeAnalyser::default()
            .with(SOURCE_DIMS, vec![face_at(5.0)])
            .with(TARGET_DIMS, vec![face_at(3.0)]);
        let pipeline = SwapPipeline::new(&analyser, &swapper, 95);

        let good = fixture(false);
        let mut unreadable = fixture(true);
        unreadable.request.source_path = unreadable.dir.path().join("missing.png");

        for fx in [&good, &unreadable] {
            let result = pipeline.process(&fx.request);
            assert_eq!(result.error_kind, Some(ErrorKind::ModelUnavailable));
            assert!(!fx.request.output_path.exists());
        }
    }

    #[test]
    fn test_unreadable_input_is_image_load_error() {
        let fx = fixture(false);
        std::fs::write(&fx.request.target_path, b"garbage").unwrap();
        let analyser = FakeAnalyser::default().with(SOURCE_DIMS, vec![face_at(5.0)]);
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);
        assert_eq!(result.error_kind, Some(ErrorKind::ImageLoadError));
        assert!(result.failure_reason.unwrap().contains("target.png"));
    }

    #[test]
    fn test_missing_detector_model_is_model_unavailable() {
        let fx = fixture(false);
        let analyser = FakeAnalyser {
            fail_with: Some(AnalyserFailure::MissingModel),
            ..FakeAnalyser::default()
        };
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);
        assert_eq!(result.error_kind, Some(ErrorKind::ModelUnavailable));
    }

    #[test]
    fn test_detector_fault_counts_as_no_face() {
        let fx = fixture(false);
        let analyser = FakeAnalyser {
            fail_with: Some(AnalyserFailure::Fault),
            ..FakeAnalyser::default()
        };
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);
        assert_eq!(result.error_kind, Some(ErrorKind::NoSourceFace));
    }

    #[test]
    fn test_unwritable_output_is_output_write_error() {
        let mut fx = fixture(false);
        let blocker = fx.dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        fx.request.output_path = blocker.join("out.jpg");
        let analyser = FakeAnalyser::default()
            .with(SOURCE_DIMS, vec![face_at(5.0)])
            .with(TARGET_DIMS, vec![face_at(3.0)]);
        let swapper = FakeSwapper::default();

        let result = SwapPipeline::new(&analyser, &swapper, 95).process(&fx.request);
        assert_eq!(result.error_kind, Some(ErrorKind::OutputWriteError));
        assert_eq!(swapper.calls().len(), 1);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(PipelineError::NoSourceFace.kind(), ErrorKind::NoSourceFace);
        assert_eq!(
            PipelineError::from(SwapError::ModelUnavailable("x".into())).kind(),
            ErrorKind::ModelUnavailable
        );
        assert_eq!(
            PipelineError::from(SwapError::NoLandmarks).kind(),
            ErrorKind::UnexpectedFailure
        );
    }
}
