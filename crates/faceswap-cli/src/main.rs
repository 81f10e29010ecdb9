use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceswap_core::config::SWAPPER_MODEL_URL;
use faceswap_core::selector::select_one;
use faceswap_core::{ErrorKind, ModelConfig, SwapRequest, SwapService};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "faceswap", about = "Swap faces between two images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Swap the source face onto the target image locally
    Swap {
        /// Image providing the face identity
        #[arg(short, long)]
        source: PathBuf,
        /// Image whose face(s) get replaced
        #[arg(short, long)]
        target: PathBuf,
        /// Where to write the JPEG result
        #[arg(short, long)]
        output: PathBuf,
        /// Replace every face in the target instead of the leftmost one
        #[arg(long)]
        many_faces: bool,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// List the faces detected in an image
    Detect {
        image: PathBuf,
        #[command(flatten)]
        models: ModelArgs,
    },
    /// Swap via the running faceswapd
    Remote {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
        #[arg(long)]
        many_faces: bool,
    },
    /// Show daemon status
    Status,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Directory holding det_10g.onnx, w600k_r50.onnx and the swap model [env: FACESWAP_MODEL_DIR]
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Swap model file, if not in the model directory [env: FACESWAP_SWAP_MODEL]
    #[arg(long)]
    model_path: Option<PathBuf>,
}

impl ModelArgs {
    fn into_config(self) -> ModelConfig {
        let mut config = match self.model_dir {
            Some(dir) => ModelConfig::with_model_dir(dir),
            None => ModelConfig::default(),
        };
        config.swapper_model = self
            .model_path
            .or_else(|| std::env::var_os("FACESWAP_SWAP_MODEL").map(PathBuf::from));
        config
    }
}

// `#[zbus::proxy]` generates `FaceSwapProxy` for the daemon's interface.
#[zbus::proxy(
    interface = "org.faceswap.FaceSwap1",
    default_service = "org.faceswap.FaceSwap1",
    default_path = "/org/faceswap/FaceSwap1"
)]
trait FaceSwap {
    async fn swap(&self, source: &str, target: &str, many_faces: bool) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Swap {
            source,
            target,
            output,
            many_faces,
            models,
        } => {
            let service = SwapService::new(models.into_config());
            let request = SwapRequest::new(source, target, output).many_faces(many_faces);
            let result = tokio::task::spawn_blocking(move || service.process(&request)).await?;
            tracing::info!(
                success = result.success,
                error_kind = ?result.error_kind,
                many_faces,
                "local swap finished"
            );

            if result.success {
                if let Some(path) = &result.output_path {
                    println!("Swapped face written to {}", path.display());
                }
                return Ok(ExitCode::SUCCESS);
            }

            let kind = result.error_kind.unwrap_or(ErrorKind::UnexpectedFailure);
            eprintln!("Swap failed ({kind}): {}", result.failure_reason.unwrap_or_default());
            if kind == ErrorKind::ModelUnavailable {
                eprintln!("Download the swap model from {SWAPPER_MODEL_URL}");
                eprintln!("and place it in the model directory (or pass --model-path).");
            }
            Ok(ExitCode::FAILURE)
        }
        Commands::Detect { image, models } => {
            let service = SwapService::new(models.into_config());
            let path = image.clone();
            let faces = tokio::task::spawn_blocking(move || service.detect_faces(&path)).await?;
            let faces = match faces {
                Ok(faces) => faces,
                Err(e) => {
                    eprintln!("Detection failed ({}): {e}", e.kind());
                    return Ok(ExitCode::FAILURE);
                }
            };

            println!("{} face(s) in {}", faces.len(), image.display());
            let boxes: Vec<_> = faces.iter().map(|f| f.bbox()).collect();
            println!("{}", serde_json::to_string_pretty(&boxes)?);
            if let Some(face) = select_one(&faces) {
                let index = faces.iter().position(|f| std::ptr::eq(f, face)).unwrap_or(0);
                println!("Single-face mode would use face #{index} (leftmost, x = {:.1})", face.bbox().x_min());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Remote {
            source,
            target,
            many_faces,
        } => {
            let proxy = connect().await?;
            let source = absolute(&source)?;
            let target = absolute(&target)?;
            let reply = proxy.swap(&source, &target, many_faces).await?;
            let value: serde_json::Value = serde_json::from_str(&reply).context("parsing daemon reply")?;
            println!("{}", serde_json::to_string_pretty(&value)?);

            if value["success"].as_bool() == Some(true) {
                Ok(ExitCode::SUCCESS)
            } else {
                if value["error_kind"].as_str() == Some(ErrorKind::ModelUnavailable.as_str()) {
                    eprintln!("The daemon has no swap model. Download it from {SWAPPER_MODEL_URL}");
                }
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Status => match connect().await {
            Ok(proxy) => {
                let reply = proxy.status().await?;
                let value: serde_json::Value = serde_json::from_str(&reply).context("parsing daemon reply")?;
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                println!("faceswapd: not connected ({e:#})");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

async fn connect() -> Result<FaceSwapProxy<'static>> {
    let conn = zbus::Connection::session().await.context("connecting to the session bus")?;
    FaceSwapProxy::new(&conn).await.context("creating faceswapd proxy")
}

/// The daemon resolves paths against its own working directory.
fn absolute(path: &Path) -> Result<String> {
    let path = std::fs::canonicalize(path).with_context(|| format!("resolving {}", path.display()))?;
    Ok(path.to_string_lossy().into_owned())
}
