//! Weights file provider: use the local file, or download it once

use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::utils::error::{Error, Result, ResultExt};
use crate::utils::logging::ByteProgress;

/// Release asset fetched when the weights file is absent
pub const DEFAULT_MODEL_URL: &str =
    "https://github.com/bhataakib02/-PashuVision/releases/download/v1.0/best_model_convnext_base_acc0.7007.safetensors";

/// Default weights location, relative to the working directory
pub const DEFAULT_MODEL_PATH: &str = "models/best_model_convnext_base_acc0.7007.safetensors";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CHUNK_SIZE: usize = 64 * 1024;

/// Fetches a remote file into a local path
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`; returns the number of bytes written
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Blocking HTTP downloader; must not run on an async runtime thread
#[derive(Debug, Default, Clone)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|e| Error::Download(format!("failed to build HTTP client: {}", e)))?;

        let mut response = client
            .get(url)
            .send()
            .map_err(|e| Error::Download(format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(format!("{} returned HTTP {}", url, status)));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let part = partial_path(dest);
        let total = response_length(&response);
        let written = stream_to_file(&mut response, &part, total);
        match written {
            Ok(bytes) => {
                std::fs::rename(&part, dest)
                    .with_context(|| format!("failed to move {:?} into place", part))?;
                Ok(bytes)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                Err(e)
            }
        }
    }
}

fn response_length(response: &reqwest::blocking::Response) -> Option<u64> {
    response.content_length().filter(|n| *n > 0)
}

/// `<dest>.part`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Copy `reader` into a new file at `path`, logging progress
pub fn stream_to_file(reader: &mut impl Read, path: &Path, total: Option<u64>) -> Result<u64> {
    let mut file = File::create(path)?;
    let mut progress = ByteProgress::new("Downloading model", total);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::Download(format!("download interrupted: {}", e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| Error::Download(format!("failed to write {:?}: {}", path, e)))?;
        progress.advance(n as u64);
    }
    file.sync_all()?;
    progress.finish();
    Ok(progress.bytes())
}

/// Where the weights live and where to get them from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightsLocator {
    pub path: PathBuf,
    pub url: Option<String>,
}

impl WeightsLocator {
    pub fn new(path: impl Into<PathBuf>, url: Option<String>) -> Self {
        Self {
            path: path.into(),
            url: url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// Path of an existing weights file, downloading it first if needed
    pub fn ensure(&self, downloader: &dyn Downloader) -> Result<PathBuf> {
        if self.path.exists() {
            info!("Using local weights at {:?}", self.path);
            return Ok(self.path.clone());
        }

        let Some(url) = self.url.as_deref() else {
            warn!("Weights not found at {:?} and no download URL configured", self.path);
            return Err(Error::NotFound(self.path.clone()));
        };

        info!("Weights not found at {:?}, downloading from {}", self.path, url);
        let bytes = downloader.download(url, &self.path)?;
        info!(
            "Downloaded {} to {:?}",
            crate::utils::format_bytes(bytes),
            self.path
        );
        Ok(self.path.clone())
    }
}
