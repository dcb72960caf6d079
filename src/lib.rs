//! # BreedVision
//!
//! Cattle and buffalo breed classification with a ConvNeXt network built on the
//! Burn framework, packaged for an HTTP inference service.
//!
//! ## Features
//!
//! - **Checkpoint interpretation** of `safetensors` files in every historical layout
//! - **Architecture resolution** from metadata and weight shapes
//! - **Non-strict weight loading** that reports instead of failing
//! - **Background loading** with retries, backoff and lazy or eager triggers
//! - **Top-5 breed prediction** and cattle/buffalo bucketing
//!
//! ## Modules
//!
//! - `checkpoint`: Decoding, layout detection and model metadata
//! - `model`: ConvNeXt architecture, resolver and weight loader
//! - `lifecycle`: Model state machine and weights provider
//! - `inference`: Preprocessing, prediction and species bucketing
//! - `utils`: Logging and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use breedvision::backend::{default_device, InferenceBackend};
//! use breedvision::lifecycle::{CheckpointModelLoader, LifecycleConfig, LifecycleController, WeightsLocator};
//!
//! let loader = CheckpointModelLoader::<InferenceBackend>::new(
//!     WeightsLocator::new("models/model.safetensors", None),
//!     default_device(),
//! );
//! let controller = LifecycleController::new(Arc::new(loader), LifecycleConfig::default());
//! controller.request_load();
//! ```

pub mod backend;
pub mod checkpoint;
pub mod inference;
pub mod lifecycle;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use checkpoint::{CheckpointLayout, ModelInfo};
pub use inference::{Prediction, Species, SpeciesPrediction};
pub use lifecycle::{Availability, LifecycleConfig, LifecycleController, ModelState, StatusSnapshot};
pub use model::{ConvNext, ConvNextVariant};
pub use utils::error::{Error, FailureKind, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
