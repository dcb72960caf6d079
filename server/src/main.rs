//! Breed Prediction Server
//!
//! HTTP API serving cattle and buffalo breed predictions. The model loads in
//! the background, either on the first request or at startup, while the health
//! endpoint stays responsive.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};

use breedvision::backend::{backend_name, default_device, device_name, InferenceBackend};
use breedvision::lifecycle::{
    CheckpointModelLoader, LifecycleConfig, LifecycleController, WeightsLocator, DEFAULT_MODEL_PATH,
    DEFAULT_MODEL_URL,
};
use breedvision::utils::logging::{init_logging, LogConfig};
use breedvision_server::build_router;
use breedvision_server::state::{default_info_path, AppState, ServerConfig};

/// Breed Prediction Server
#[derive(Parser, Debug)]
#[command(name = "breedvision-server")]
#[command(version)]
#[command(about = "HTTP API serving cattle and buffalo breed predictions")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5001")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Weights file (downloaded here when absent)
    #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    model_path: PathBuf,

    /// Side metadata file [default: model_info.json next to the weights]
    #[arg(long, env = "MODEL_INFO_PATH")]
    model_info_path: Option<PathBuf>,

    /// Download URL for the weights; empty disables downloading
    #[arg(long, env = "MODEL_DOWNLOAD_URL", default_value = DEFAULT_MODEL_URL)]
    model_url: String,

    /// Load the model at startup instead of on the first request
    #[arg(long, env = "MODEL_EAGER_LOAD", default_value = "false")]
    eager_load: bool,

    /// Load the model on the first prediction request
    #[arg(long, env = "MODEL_LAZY_LOAD", default_value = "true", action = ArgAction::Set)]
    lazy_load: bool,

    /// Seconds to wait before an eager load starts
    #[arg(long, env = "MODEL_SETTLE_DELAY_SECS", default_value = "5")]
    settle_delay_secs: u64,

    /// Load attempts before giving up
    #[arg(long, env = "MODEL_LOAD_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// Base backoff between attempts, multiplied by the attempt number
    #[arg(long, env = "MODEL_LOAD_BACKOFF_SECS", default_value = "5")]
    backoff_secs: u64,

    /// Extra backoff factor after an out-of-memory failure
    #[arg(long, env = "MODEL_LOAD_OOM_MULTIPLIER", default_value = "3")]
    oom_multiplier: u32,

    /// Maximum upload size in MiB
    #[arg(long, env = "MAX_UPLOAD_MB", default_value = "16")]
    max_upload_mb: usize,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let model_info_path = self
            .model_info_path
            .unwrap_or_else(|| default_info_path(&self.model_path));
        let model_url = Some(self.model_url).filter(|u| !u.trim().is_empty());

        ServerConfig {
            host: self.host,
            port: self.port,
            model_path: self.model_path,
            model_info_path,
            model_url,
            max_upload_mb: self.max_upload_mb,
            lifecycle: LifecycleConfig {
                eager_load: self.eager_load,
                lazy_load: self.lazy_load,
                settle_delay_secs: self.settle_delay_secs,
                max_attempts: self.max_attempts,
                backoff_secs: self.backoff_secs,
                oom_multiplier: self.oom_multiplier,
            },
        }
    }
}

/// Reject unusable settings and warn about recoverable ones
fn validate_startup(config: &ServerConfig) -> Result<()> {
    if config.port == 0 {
        bail!("invalid port 0");
    }
    if config.max_upload_mb == 0 {
        bail!("max upload size must be at least 1 MiB");
    }
    config.lifecycle.validate()?;

    if config.model_path.exists() {
        info!("Model file found at {:?}", config.model_path);
    } else if config.model_url.is_some() {
        warn!(
            "Model file not found at {:?}, will attempt download",
            config.model_path
        );
    } else {
        warn!(
            "Model file not found at {:?} and downloading is disabled; loading will fail",
            config.model_path
        );
    }
    Ok(())
}

async fn shutdown_signal(controller: Arc<LifecycleController>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    controller.shutdown();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::production()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    let config = cli.into_config();

    info!("Breed Prediction Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model path:   {:?}", config.model_path);
    info!("  Model info:   {:?}", config.model_info_path);
    info!("  Download URL: {}", config.model_url.as_deref().unwrap_or("(disabled)"));
    info!("  Backend:      {}", backend_name());
    info!(
        "  Loading:      eager={} lazy={} attempts={} backoff={}s",
        config.lifecycle.eager_load,
        config.lifecycle.lazy_load,
        config.lifecycle.max_attempts,
        config.lifecycle.backoff_secs
    );

    validate_startup(&config)?;

    let loader = CheckpointModelLoader::<InferenceBackend>::new(
        WeightsLocator::new(&config.model_path, config.model_url.clone()),
        default_device(),
    )
    .with_info_path(&config.model_info_path);
    let controller = LifecycleController::new(Arc::new(loader), config.lifecycle.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(AppState::new(config, Arc::clone(&controller), device_name()));
    let app = build_router(state);

    controller.start_eager();

    info!("Starting server on http://{}", addr);
    info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await?;

    Ok(())
}
