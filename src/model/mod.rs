//! Model module containing the ConvNeXt network and its loading helpers
//!
//! This module provides:
//! - The ConvNeXt family implemented with Burn
//! - Architecture resolution from checkpoint metadata and weight shapes
//! - Non-strict weight loading with a load report

pub mod architecture;
pub mod convnext;
pub mod loader;

// Re-export main types for convenience
pub use architecture::{resolve, Resolution, ResolvePolicy};
pub use convnext::{ConvNext, ConvNextConfig, ConvNextVariant};
pub use loader::LoadReport;
