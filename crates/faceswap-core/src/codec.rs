//! Image decode and JPEG encode at the pipeline edges.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted as swap inputs.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to decode {path}: {source}")]
    Decode { path: PathBuf, source: ImageError },
    #[error("failed to encode image: {0}")]
    Encode(#[source] ImageError),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// Whether `path` carries one of [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Decode an image file to 8-bit RGB. Animated GIFs yield their first frame.
///
/// The format is sniffed from the file contents; the extension is only a fallback.
pub fn load_image(path: &Path) -> Result<RgbImage, CodecError> {
    let decode_err = |source| CodecError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let image = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| decode_err(ImageError::IoError(e)))?
        .decode()
        .map_err(decode_err)?;
    Ok(image.to_rgb8())
}

/// Encode `image` as JPEG and write it to `path`, creating parent directories.
///
/// Nothing is left at `path` if the write fails.
pub fn save_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), CodecError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .map_err(CodecError::Encode)?;

    let write_err = |source| CodecError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    if let Err(e) = std::fs::write(path, &buf) {
        let _ = std::fs::remove_file(path);
        return Err(write_err(e));
    }

    tracing::debug!(path = %path.display(), bytes = buf.len(), quality, "wrote JPEG");
    Ok(())
}
