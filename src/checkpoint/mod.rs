//! Checkpoint module: decoding, layout interpretation and model metadata
//!
//! This module provides:
//! - `safetensors` decoding into host-side `f32` tensors
//! - Detection of the historical checkpoint layouts
//! - `module.` prefix normalization
//! - Class names, class count and preprocessing statistics

pub mod layout;
pub mod metadata;
pub mod reader;
pub mod tensor;

// Re-export main types for convenience
pub use layout::{interpret, CheckpointLayout, ContainerKey, InterpretedCheckpoint};
pub use metadata::{MetadataOverrides, ModelInfo, MIN_INPUT_SIZE};
pub use reader::RawCheckpoint;
pub use tensor::{WeightMap, WeightTensor};
