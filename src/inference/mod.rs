//! Inference module for breed and species prediction
//!
//! This module provides:
//! - Image decoding, resizing and normalization
//! - Top-5 breed prediction behind the `Classifier` trait
//! - Cattle/buffalo bucketing of the top prediction

pub mod predictor;
pub mod preprocess;
pub mod species;

// Re-export main types for convenience
pub use predictor::{softmax, top_k, BurnClassifier, Classifier, Prediction, Predictor, TOP_K};
pub use preprocess::Preprocessor;
pub use species::{predict_species, Species, SpeciesPrediction, BUFFALO_BREEDS};
