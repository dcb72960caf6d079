//! Species bucketing of breed predictions
//!
//! A breed whose label contains a buffalo breed name is a buffalo; every other
//! label, including synthesized `Class_N` labels, is cattle. There is no
//! non-animal bucket.

use serde::{Deserialize, Serialize};

use super::predictor::Predictor;
use crate::utils::error::Result;

/// Buffalo breeds; labels are matched by substring
pub const BUFFALO_BREEDS: [&str; 7] = [
    "Murrah",
    "Mehsana",
    "Surti",
    "Jaffrabadi",
    "Nili_Ravi",
    "Nagpuri",
    "Bhadawari",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Cattle,
    Buffalo,
}

impl Species {
    /// Bucket a breed label
    pub fn from_breed(breed: &str) -> Self {
        if BUFFALO_BREEDS.iter().any(|b| breed.contains(b)) {
            Species::Buffalo
        } else {
            Species::Cattle
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesPrediction {
    pub species: Species,
    /// Confidence of the top breed prediction
    pub confidence: f32,
}

/// Species of the top-1 breed prediction
pub fn predict_species(predictor: &Predictor<'_>, bytes: &[u8]) -> Result<SpeciesPrediction> {
    let top = predictor.predict_top1(bytes)?;
    Ok(SpeciesPrediction {
        species: Species::from_breed(&top.breed),
        confidence: top.confidence,
    })
}
