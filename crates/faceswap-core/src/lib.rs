//! faceswap-core: single-image face swapping.
//!
//! SCRFD finds faces, ArcFace gives each one an identity embedding, and
//! inswapper renders the source identity onto target faces. All three run
//! on CPU via ONNX Runtime. [`SwapService`] owns the models and runs one
//! [`SwapRequest`] at a time through [`SwapPipeline`].

pub mod alignment;
pub mod analyser;
pub mod codec;
pub mod config;
pub mod detector;
pub mod emap;
mod lazy;
pub mod paste;
pub mod pipeline;
pub mod recognizer;
pub mod selector;
pub mod service;
pub mod swapper;
pub mod types;

pub use analyser::{AnalyserError, FaceAnalyser, OnnxFaceAnalyser};
pub use config::ModelConfig;
pub use pipeline::{PipelineError, SwapPipeline};
pub use service::{ServiceStatus, SwapService};
pub use swapper::{FaceSwapper, InSwapper, SwapError};
pub use types::{BoundingBox, Embedding, ErrorKind, Face, FaceSet, SwapRequest, SwapResult};
