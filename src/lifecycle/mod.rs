//! Model lifecycle: locating weights, loading them in the background, retrying
//!
//! This module provides:
//! - The `Unloaded → Loading → Ready | Failed` state machine
//! - Lazy (first request) and eager (process start) load triggers
//! - Linear retry backoff, stretched for out-of-memory failures
//! - Weights download when the local file is absent

pub mod backoff;
pub mod controller;
pub mod loader;
pub mod source;
pub mod state;

// Re-export main types for convenience
pub use backoff::BackoffPolicy;
pub use controller::{LifecycleConfig, LifecycleController};
pub use loader::{CheckpointModelLoader, LoadedModel, ModelLoader};
pub use source::{Downloader, HttpDownloader, WeightsLocator, DEFAULT_MODEL_PATH, DEFAULT_MODEL_URL};
pub use state::{Availability, ModelState, StatusSnapshot};
