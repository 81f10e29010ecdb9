//! inswapper face swap model via ONNX Runtime.
//!
//! The target face is aligned to a 128×128 crop, the model renders the
//! source identity into that crop, and the result is pasted back into the
//! frame with a feathered mask.

use crate::alignment;
use crate::emap::{self, EmapError};
use crate::lazy::LazyModel;
use crate::paste;
use crate::recognizer::l2_normalize;
use crate::types::Face;
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4, ArrayView1};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: usize = 128;
const TARGET_INPUT: &str = "target";
const SOURCE_INPUT: &str = "source";

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("swap model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("face has no landmarks")]
    NoLandmarks,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("emap: {0}")]
    Emap(#[from] EmapError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Renders the identity of `source` onto `target` inside `frame`.
///
/// Returns a new frame of the same dimensions. Implementations never hand
/// back the frame unmodified in place of a missing model; they fail with
/// [`SwapError::ModelUnavailable`] instead.
pub trait FaceSwapper: Send + Sync {
    /// Load the model now rather than on the first swap.
    fn prepare(&self) -> Result<(), SwapError>;

    fn swap(&self, source: &Face, target: &Face, frame: &RgbImage) -> Result<RgbImage, SwapError>;

    /// Whether the model is resident.
    fn is_loaded(&self) -> bool {
        false
    }
}

struct SwapModel {
    session: Session,
    emap: Array2<f32>,
    target_input: String,
    source_input: String,
}

impl SwapModel {
    fn load(model_path: &Path, intra_threads: usize) -> Result<Self, SwapError> {
        if !model_path.exists() {
            return Err(SwapError::ModelUnavailable(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let input_names: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        if input_names.len() != 2 {
            return Err(SwapError::InferenceFailed(format!(
                "inswapper expects 2 inputs (target, source), got {input_names:?}"
            )));
        }
        let (target_input, source_input) = resolve_input_names(&input_names);

        let emap = emap::load_emap(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            emap = ?emap.dim(),
            "loaded inswapper model"
        );

        Ok(Self {
            session,
            emap,
            target_input,
            source_input,
        })
    }

    fn swap(&mut self, source: &Face, target: &Face, frame: &RgbImage) -> Result<RgbImage, SwapError> {
        let landmarks = target.landmarks().ok_or(SwapError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks, INSWAPPER_INPUT_SIZE as u32);

        let blob = preprocess(&aligned.image);
        let latent = project_embedding(&source.embedding().values, &self.emap)?;

        let outputs = self.session.run(ort::inputs![
            self.target_input.clone() => TensorRef::from_array_view(blob.view())?,
            self.source_input.clone() => TensorRef::from_array_view(latent.view())?,
        ])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapError::InferenceFailed(format!("swapped crop extraction: {e}")))?;
        let crop = postprocess(raw, INSWAPPER_INPUT_SIZE)?;

        Ok(paste::paste_back(frame, &crop, &aligned.matrix))
    }
}

/// inswapper_128 model, loaded on first use.
pub struct InSwapper {
    model_path: PathBuf,
    intra_threads: usize,
    model: LazyModel<SwapModel>,
}

impl InSwapper {
    pub fn new(model_path: impl Into<PathBuf>, intra_threads: usize) -> Self {
        Self {
            model_path: model_path.into(),
            intra_threads,
            model: LazyModel::new("inswapper"),
        }
    }

    fn load(&self) -> Result<SwapModel, SwapError> {
        SwapModel::load(&self.model_path, self.intra_threads)
    }
}

impl FaceSwapper for InSwapper {
    fn prepare(&self) -> Result<(), SwapError> {
        self.model.ensure(|| self.load())
    }

    fn swap(&self, source: &Face, target: &Face, frame: &RgbImage) -> Result<RgbImage, SwapError> {
        self.model.with(|| self.load(), |model| model.swap(source, target, frame))
    }

    fn is_loaded(&self) -> bool {
        self.model.is_loaded()
    }
}

/// Match the graph inputs by name, falling back to (target, source) order.
fn resolve_input_names(names: &[String]) -> (String, String) {
    let find = |wanted: &str| names.iter().find(|n| n.as_str() == wanted).cloned();
    match (find(TARGET_INPUT), find(SOURCE_INPUT)) {
        (Some(target), Some(source)) => (target, source),
        _ => (names[0].clone(), names[1].clone()),
    }
}

/// RGB crop to a `[1, 3, H, W]` tensor scaled to [0, 1].
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Source identity latent: the embedding projected through the emap, unit length.
fn project_embedding(embedding: &[f32], emap: &Array2<f32>) -> Result<Array2<f32>, SwapError> {
    if embedding.len() != emap.nrows() {
        return Err(SwapError::InferenceFailed(format!(
            "embedding has {} values, emap expects {}",
            embedding.len(),
            emap.nrows()
        )));
    }
    let projected = ArrayView1::from(embedding).dot(emap);
    let latent = l2_normalize(&projected.to_vec());
    Array2::from_shape_vec((1, latent.len()), latent)
        .map_err(|e| SwapError::InferenceFailed(format!("latent shape: {e}")))
}

/// `[1, 3, size, size]` model output in [0, 1] back to an 8-bit RGB crop.
fn postprocess(raw: &[f32], size: usize) -> Result<RgbImage, SwapError> {
    let plane = size * size;
    if raw.len() != 3 * plane {
        return Err(SwapError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            raw.len()
        )));
    }
    let to_u8 = |v: f32| (v * 255.0).clamp(0.0, 255.0) as u8;
    Ok(RgbImage::from_fn(size as u32, size as u32, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb([to_u8(raw[i]), to_u8(raw[plane + i]), to_u8(raw[2 * plane + i])])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};

    fn face() -> Face {
        Face {
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 50.0,
                height: 50.0,
                confidence: 0.9,
                landmarks: Some([(20.0, 25.0), (40.0, 25.0), (30.0, 35.0), (22.0, 45.0), (38.0, 45.0)]),
            },
            embedding: Embedding {
                values: vec![0.6, 0.8],
                model_version: None,
            },
        }
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let swapper = InSwapper::new(dir.path().join("inswapper_128_fp16.onnx"), 1);

        assert!(matches!(swapper.prepare(), Err(SwapError::ModelUnavailable(_))));
        let frame = RgbImage::new(64, 64);
        assert!(matches!(
            swapper.swap(&face(), &face(), &frame),
            Err(SwapError::ModelUnavailable(_))
        ));
        assert!(!swapper.is_loaded());
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let crop = RgbImage::from_pixel(128, 128, Rgb([255, 0, 51]));
        let t = preprocess(&crop);
        assert_eq!(t.shape(), &[1, 3, 128, 128]);
        assert_eq!(t[[0, 0, 5, 7]], 1.0);
        assert_eq!(t[[0, 1, 5, 7]], 0.0);
        assert!((t[[0, 2, 5, 7]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_project_embedding_is_normalized() {
        let emap = Array2::from_shape_vec((2, 2), vec![2.0, 0.0, 0.0, 2.0]).unwrap();
        let latent = project_embedding(&[3.0, 4.0], &emap).unwrap();
        assert_eq!(latent.dim(), (1, 2));
        assert!((latent[[0, 0]] - 0.6).abs() < 1e-6);
        assert!((latent[[0, 1]] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_project_embedding_rejects_dim_mismatch() {
        let emap = Array2::<f32>::eye(3);
        assert!(matches!(
            project_embedding(&[1.0, 0.0], &emap),
            Err(SwapError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_postprocess_clips_and_reorders_planes() {
        let size = 2;
        let mut raw = vec![0.0f32; 3 * size * size];
        raw[0] = 1.5; // R of (0,0), above range
        raw[4] = 0.5; // G of (0,0)
        raw[8 + 3] = -0.2; // B of (1,1), below range
        let crop = postprocess(&raw, size).unwrap();
        assert_eq!(crop.get_pixel(0, 0), &Rgb([255, 127, 0]));
        assert_eq!(crop.get_pixel(1, 1), &Rgb([0, 0, 0]));
        assert!(postprocess(&raw[1..], size).is_err());
    }

    #[test]
    fn test_resolve_input_names() {
        let named = vec!["source".to_string(), "target".to_string()];
        assert_eq!(resolve_input_names(&named), ("target".into(), "source".into()));
        let anonymous = vec!["input.1".to_string(), "input.7".to_string()];
        assert_eq!(resolve_input_names(&anonymous), ("input.1".into(), "input.7".into()));
    }
}
