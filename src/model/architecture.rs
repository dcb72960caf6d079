//! Architecture resolution
//!
//! Picks the ConvNeXt variant and class count that a weights mapping will be
//! loaded into. Resolution never fails; building falls back to the smallest
//! variant when the resolved one cannot be constructed.

use std::collections::BTreeSet;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::convnext::{ConvNext, ConvNextConfig, ConvNextVariant};
use crate::checkpoint::metadata::DEFAULT_BREEDS;
use crate::checkpoint::WeightMap;

/// Classifier weight whose leading dimension is the true class count
pub const HEAD_WEIGHT_KEY: &str = "head.fc.weight";

/// Stem convolution weight whose leading dimension is the first stage width
pub const STEM_WEIGHT_KEY: &str = "stem.0.weight";

/// How the variant is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ResolvePolicy {
    /// Always pick the smallest of the candidates, bounding memory use
    SmallestCandidate { candidates: Vec<ConvNextVariant> },
    /// Infer the variant from the stem width stored in the weights
    SniffStemWidth,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        ResolvePolicy::SmallestCandidate {
            candidates: vec![ConvNextVariant::Base, ConvNextVariant::Tiny],
        }
    }
}

/// Outcome of architecture resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub variant: ConvNextVariant,
    pub num_classes: usize,
    pub policy: ResolvePolicy,
    /// The class count came from the classifier weight shape
    pub inferred_from_weights: bool,
}

/// Resolve variant and class count for `weights`.
///
/// The leading dimension of `head.fc.weight` wins over `declared_num_classes`;
/// without either the default breed count is used.
pub fn resolve(
    declared_num_classes: Option<usize>,
    weights: &WeightMap,
    policy: &ResolvePolicy,
) -> Resolution {
    let from_weights = weights
        .get(HEAD_WEIGHT_KEY)
        .and_then(|w| w.leading_dim())
        .filter(|n| *n > 0);

    let num_classes = match (from_weights, declared_num_classes) {
        (Some(actual), Some(declared)) if actual != declared => {
            warn!(
                "Checkpoint declares {} classes but the classifier has {} outputs; using {}",
                declared, actual, actual
            );
            actual
        }
        (Some(actual), _) => actual,
        (None, Some(declared)) if declared > 0 => declared,
        _ => DEFAULT_BREEDS.len(),
    };

    let variant = match policy {
        ResolvePolicy::SmallestCandidate { candidates } => candidates
            .iter()
            .min()
            .copied()
            .unwrap_or(ConvNextVariant::Tiny),
        ResolvePolicy::SniffStemWidth => sniff_stem_width(weights),
    };

    info!(
        "Resolved architecture {} with {} classes ({:?})",
        variant, num_classes, policy
    );

    Resolution {
        variant,
        num_classes,
        policy: policy.clone(),
        inferred_from_weights: from_weights.is_some(),
    }
}

/// Variant named by checkpoint metadata: the `arch` entry, else `config.model_name`
pub fn hinted_variant(arch: Option<&str>, model_name: Option<&str>) -> Option<ConvNextVariant> {
    arch.and_then(ConvNextVariant::from_name)
        .or_else(|| model_name.and_then(ConvNextVariant::from_name))
}

/// Infer the variant from the stem width; unknown widths map to base
pub fn sniff_stem_width(weights: &WeightMap) -> ConvNextVariant {
    let Some(width) = weights.get(STEM_WEIGHT_KEY).and_then(|w| w.leading_dim()) else {
        warn!("No {} in weights, assuming {}", STEM_WEIGHT_KEY, ConvNextVariant::Base);
        return ConvNextVariant::Base;
    };

    match width {
        40 => ConvNextVariant::Atto,
        48 => ConvNextVariant::Femto,
        64 => ConvNextVariant::Pico,
        80 => ConvNextVariant::Nano,
        96 => {
            if stage_block_count(weights, 2) > ConvNextVariant::Tiny.depths()[2] {
                ConvNextVariant::Small
            } else {
                ConvNextVariant::Tiny
            }
        }
        128 => ConvNextVariant::Base,
        192 => ConvNextVariant::Large,
        other => {
            warn!("Unknown stem width {}, assuming {}", other, ConvNextVariant::Base);
            ConvNextVariant::Base
        }
    }
}

/// Number of distinct blocks stored for `stage`
pub fn stage_block_count(weights: &WeightMap, stage: usize) -> usize {
    let prefix = format!("stages.{}.blocks.", stage);
    weights
        .keys()
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|idx| idx.parse::<usize>().ok())
        .collect::<BTreeSet<_>>()
        .len()
}

/// Build the resolved network, falling back to the smallest variant
pub fn build<B: Backend>(
    resolution: &Resolution,
    device: &B::Device,
) -> (ConvNext<B>, ConvNextVariant) {
    let config = ConvNextConfig::from_variant(resolution.variant, resolution.num_classes);
    match config.try_init::<B>(device) {
        Ok(model) => (model, resolution.variant),
        Err(e) => {
            let fallback = ConvNextVariant::ALL[0];
            warn!(
                "Could not build {} ({}); falling back to {}",
                resolution.variant, e, fallback
            );
            let num_classes = resolution.num_classes.max(1);
            let model = ConvNext::new(&ConvNextConfig::from_variant(fallback, num_classes), device);
            (model, fallback)
        }
    }
}
