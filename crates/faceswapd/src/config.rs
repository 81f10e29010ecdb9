use faceswap_core::config::{default_model_dir, ModelConfig, DEFAULT_JPEG_QUALITY};
use faceswap_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use std::path::PathBuf;
use std::str::FromStr;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Model locations and inference settings.
    pub model: ModelConfig,
    /// Directory swap results are written to (default: results).
    pub results_dir: PathBuf,
    /// Number of worker threads running swaps.
    pub workers: usize,
}

impl Config {
    /// Load configuration from `FACESWAP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model = ModelConfig {
            model_dir: default_model_dir(),
            swapper_model: std::env::var("FACESWAP_SWAP_MODEL").ok().map(PathBuf::from),
            det_threshold: env_f32("FACESWAP_DET_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            intra_threads: env_usize("FACESWAP_INTRA_THREADS", 2).max(1),
            jpeg_quality: env_u8("FACESWAP_JPEG_QUALITY", DEFAULT_JPEG_QUALITY).clamp(1, 100),
            ..ModelConfig::default()
        };

        Self {
            model,
            results_dir: std::env::var("FACESWAP_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("results")),
            workers: env_usize("FACESWAP_WORKERS", 2).max(1),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    parse_or(std::env::var(key).ok(), default)
}

fn env_u8(key: &str, default: u8) -> u8 {
    parse_or(std::env::var(key).ok(), default)
}

fn env_usize(key: &str, default: usize) -> usize {
    parse_or(std::env::var(key).ok(), default)
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
