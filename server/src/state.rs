//! Application state for the breed classification server
//!
//! Holds the lifecycle controller and the settings the handlers need.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use breedvision::lifecycle::{LifecycleConfig, LifecycleController, DEFAULT_MODEL_PATH, DEFAULT_MODEL_URL};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Weights file, downloaded here when absent
    pub model_path: PathBuf,
    /// Side metadata file
    pub model_info_path: PathBuf,
    /// Where to download the weights from; `None` disables downloading
    pub model_url: Option<String>,
    /// Maximum accepted upload size in MiB
    pub max_upload_mb: usize,
    pub lifecycle: LifecycleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let model_path = PathBuf::from(DEFAULT_MODEL_PATH);
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            model_info_path: default_info_path(&model_path),
            model_path,
            model_url: Some(DEFAULT_MODEL_URL.to_string()),
            max_upload_mb: 16,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// `model_info.json` next to the weights file
pub fn default_info_path(model_path: &std::path::Path) -> PathBuf {
    model_path
        .parent()
        .map(|dir| dir.join("model_info.json"))
        .unwrap_or_else(|| PathBuf::from("model_info.json"))
}

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Owner of the model lifecycle
    pub controller: Arc<LifecycleController>,
    /// Compute device label reported to clients
    pub device: String,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, controller: Arc<LifecycleController>, device: &str) -> Self {
        Self {
            config,
            controller,
            device: device.to_string(),
            started_at: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
