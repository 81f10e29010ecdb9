use crate::engine::EngineHandle;
use chrono::{DateTime, Utc};
use faceswap_core::codec::{is_supported_extension, SUPPORTED_EXTENSIONS};
use faceswap_core::SwapRequest;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zbus::interface;

pub const BUS_NAME: &str = "org.faceswap.FaceSwap1";
pub const OBJECT_PATH: &str = "/org/faceswap/FaceSwap1";

/// D-Bus interface for the face swap daemon.
///
/// Bus name: org.faceswap.FaceSwap1
/// Object path: /org/faceswap/FaceSwap1
pub struct FaceSwapService {
    engine: EngineHandle,
    results_dir: PathBuf,
    started_at: DateTime<Utc>,
}

impl FaceSwapService {
    pub fn new(engine: EngineHandle, results_dir: PathBuf) -> Self {
        Self {
            engine,
            results_dir,
            started_at: Utc::now(),
        }
    }
}

#[interface(name = "org.faceswap.FaceSwap1")]
impl FaceSwapService {
    /// Swap the face in `source` onto `target`, returning a JSON result.
    async fn swap(&self, source: &str, target: &str, many_faces: bool) -> zbus::fdo::Result<String> {
        let source_path = validate_input(source, "source").map_err(zbus::fdo::Error::InvalidArgs)?;
        let target_path = validate_input(target, "target").map_err(zbus::fdo::Error::InvalidArgs)?;

        let session_id = Uuid::new_v4();
        let output_path = self.results_dir.join(format!("result_{session_id}.jpg"));
        tracing::info!(%session_id, source, target, many_faces, "swap requested");

        let request = SwapRequest::new(source_path, target_path, output_path).many_faces(many_faces);
        let result = self
            .engine
            .swap(request)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        Ok(serde_json::json!({
            "session_id": session_id.to_string(),
            "success": result.success,
            "output_path": result.output_path,
            "error_kind": result.error_kind,
            "failure_reason": result.failure_reason,
        })
        .to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status();
        Ok(serde_json::json!({
            "status": "running",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": self.started_at.to_rfc3339(),
            "model_loaded": status.swapper_loaded,
            "model_present": status.model_present,
            "model_path": status.swap_model_path,
            "analyser_loaded": status.analyser_loaded,
            "swapper_loaded": status.swapper_loaded,
            "workers": self.engine.workers(),
        })
        .to_string())
    }

    async fn health(&self) -> zbus::fdo::Result<String> {
        Ok("healthy".into())
    }
}

/// Check a caller-supplied image path before it reaches the pipeline.
fn validate_input(raw: &str, role: &str) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err(format!("{role} path is empty"));
    }
    let path = Path::new(raw);
    if !is_supported_extension(path) {
        return Err(format!(
            "{role} file type not allowed: {raw} (expected one of {})",
            SUPPORTED_EXTENSIONS.join(", ")
        ));
    }
    if !path.is_file() {
        return Err(format!("{role} file not found: {raw}"));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("face.PNG");
        std::fs::write(&image, b"png").unwrap();
        let image_str = image.to_str().unwrap();

        assert_eq!(validate_input(image_str, "source").unwrap(), image);
        assert!(validate_input("", "source").unwrap_err().contains("empty"));
        assert!(validate_input("  ", "target").unwrap_err().starts_with("target"));
        assert!(validate_input("notes.txt", "source").unwrap_err().contains("not allowed"));

        let missing = dir.path().join("missing.jpg");
        let err = validate_input(missing.to_str().unwrap(), "target").unwrap_err();
        assert!(err.contains("not found"), "{err}");
    }
}
