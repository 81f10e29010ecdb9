use anyhow::{Context, Result};
use faceswap_core::config::SWAPPER_MODEL_URL;
use faceswap_core::SwapService;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "faceswapd starting");

    let config = config::Config::from_env();
    std::fs::create_dir_all(&config.results_dir)
        .with_context(|| format!("creating results dir {}", config.results_dir.display()))?;

    let swap_model = config.model.swapper_model_path();
    if swap_model.exists() {
        tracing::info!(path = %swap_model.display(), "swap model found");
    } else {
        tracing::warn!(
            path = %swap_model.display(),
            download = SWAPPER_MODEL_URL,
            "swap model missing; every swap will fail with ModelUnavailable until it is installed"
        );
    }

    let service = Arc::new(SwapService::new(config.model));
    let engine = engine::spawn_engine(service, config.workers)?;
    let iface = dbus_interface::FaceSwapService::new(engine, config.results_dir.clone());

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, iface)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(
        bus_name = dbus_interface::BUS_NAME,
        results_dir = %config.results_dir.display(),
        "faceswapd ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceswapd shutting down");

    Ok(())
}
