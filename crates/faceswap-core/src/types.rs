use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Left edge.
    pub fn x_min(&self) -> f32 {
        self.x
    }

    /// Top edge.
    pub fn y_min(&self) -> f32 {
        self.y
    }

    pub fn x_max(&self) -> f32 {
        self.x + self.width
    }

    pub fn y_max(&self) -> f32 {
        self.y + self.height
    }
}

/// Face identity vector (512-dimensional for ArcFace), L2-normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Euclidean norm of the raw vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// One detected face in one image: where it is and who it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

impl Face {
    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn landmarks(&self) -> Option<&[(f32, f32); 5]> {
        self.bbox.landmarks.as_ref()
    }
}

/// Faces found in one image, in the order the detector reported them.
pub type FaceSet = Vec<Face>;

/// Input to one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub many_faces: bool,
}

impl SwapRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            output_path: output_path.into(),
            many_faces: false,
        }
    }

    pub fn many_faces(mut self, many_faces: bool) -> Self {
        self.many_faces = many_faces;
        self
    }
}

/// Closed set of terminal pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ImageLoadError,
    NoSourceFace,
    NoTargetFace,
    ModelUnavailable,
    OutputWriteError,
    UnexpectedFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ImageLoadError => "ImageLoadError",
            ErrorKind::NoSourceFace => "NoSourceFace",
            ErrorKind::NoTargetFace => "NoTargetFace",
            ErrorKind::ModelUnavailable => "ModelUnavailable",
            ErrorKind::OutputWriteError => "OutputWriteError",
            ErrorKind::UnexpectedFailure => "UnexpectedFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub error_kind: Option<ErrorKind>,
    /// Human-readable detail for `error_kind`.
    pub failure_reason: Option<String>,
}

impl SwapResult {
    pub fn succeeded(output_path: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.into()),
            error_kind: None,
            failure_reason: None,
        }
    }

    pub fn failed(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            output_path: None,
            error_kind: Some(kind),
            failure_reason: Some(reason.into()),
        }
    }
}
