//! Checkpoint layout detection and interpretation
//!
//! Historical checkpoints store their weights in one of several places. Each
//! recognized place is a [`CheckpointLayout`] variant; anything else is
//! [`CheckpointLayout::Unrecognized`] and fails the load with a format error.

use std::fmt;

use tracing::{debug, info};

use super::metadata::MetadataOverrides;
use super::reader::RawCheckpoint;
use super::tensor::WeightMap;
use crate::utils::error::{Error, Result};

/// Key prefixes of the ConvNeXt layers; their presence marks a bare weights mapping
pub const WEIGHT_PREFIXES: [&str; 3] = ["stem.", "stages.", "head."];

/// Prefix added to every parameter by multi-device (data parallel) training
pub const MULTI_DEVICE_PREFIX: &str = "module.";

/// Name under which a container checkpoint stores its weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKey {
    ModelStateDict,
    Model,
    StateDict,
}

impl ContainerKey {
    /// Probe order; the first namespace present wins
    pub const PROBE_ORDER: [ContainerKey; 3] = [
        ContainerKey::ModelStateDict,
        ContainerKey::Model,
        ContainerKey::StateDict,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ContainerKey::ModelStateDict => "model_state_dict",
            ContainerKey::Model => "model",
            ContainerKey::StateDict => "state_dict",
        }
    }

    fn prefix(&self) -> String {
        format!("{}.", self.name())
    }
}

/// Where a checkpoint keeps its weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    /// The file is itself a weights mapping
    BareWeights,
    /// Weights nested under a container key
    Container(ContainerKey),
    /// No weights mapping could be identified
    Unrecognized,
}

impl fmt::Display for CheckpointLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointLayout::BareWeights => write!(f, "bare weights"),
            CheckpointLayout::Container(key) => write!(f, "container ({})", key.name()),
            CheckpointLayout::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// Result of interpreting a raw checkpoint
#[derive(Debug, Clone)]
pub struct InterpretedCheckpoint {
    pub layout: CheckpointLayout,
    /// Normalized weights mapping (container prefix and `module.` removed)
    pub weights: WeightMap,
    /// Metadata found in the checkpoint header
    pub metadata: MetadataOverrides,
    /// Free-form architecture hint (`arch` header entry)
    pub arch_hint: Option<String>,
}

impl InterpretedCheckpoint {
    pub fn classes(&self) -> Option<&[String]> {
        self.metadata.classes.as_deref()
    }

    pub fn declared_num_classes(&self) -> Option<usize> {
        self.metadata.num_classes
    }
}

fn is_layer_key(key: &str) -> bool {
    let key = key.strip_prefix(MULTI_DEVICE_PREFIX).unwrap_or(key);
    WEIGHT_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Decide where the weights live without moving anything
pub fn detect_layout(tensors: &WeightMap) -> CheckpointLayout {
    if tensors.keys().any(|k| is_layer_key(k)) {
        return CheckpointLayout::BareWeights;
    }
    for key in ContainerKey::PROBE_ORDER {
        let prefix = key.prefix();
        if tensors.keys().any(|k| k.starts_with(&prefix)) {
            return CheckpointLayout::Container(key);
        }
    }
    CheckpointLayout::Unrecognized
}

/// Remove a leading `module.` from every key that carries one
pub fn strip_multi_device_prefix(weights: WeightMap) -> WeightMap {
    if !weights.keys().any(|k| k.starts_with(MULTI_DEVICE_PREFIX)) {
        return weights;
    }
    debug!("Stripping '{}' prefix from weight keys", MULTI_DEVICE_PREFIX);
    weights
        .into_iter()
        .map(|(k, v)| match k.strip_prefix(MULTI_DEVICE_PREFIX) {
            Some(stripped) => (stripped.to_string(), v),
            None => (k, v),
        })
        .collect()
}

/// Extract the weights mapping and metadata from a raw checkpoint.
///
/// Consumes `raw` so tensors move into the result without copies.
pub fn interpret(raw: RawCheckpoint) -> Result<InterpretedCheckpoint> {
    let layout = detect_layout(&raw.tensors);
    let weights = match layout {
        CheckpointLayout::BareWeights => raw.tensors,
        CheckpointLayout::Container(key) => {
            let prefix = key.prefix();
            let total = raw.tensors.len();
            let nested: WeightMap = raw
                .tensors
                .into_iter()
                .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|s| (s.to_string(), v)))
                .collect();
            if nested.len() < total {
                debug!(
                    "Ignoring {} tensors outside the '{}' container",
                    total - nested.len(),
                    key.name()
                );
            }
            nested
        }
        CheckpointLayout::Unrecognized => {
            let sample: Vec<&str> = raw.tensors.keys().take(5).map(String::as_str).collect();
            return Err(Error::Format(format!(
                "no weights mapping found among {} tensors (first keys: {:?})",
                raw.tensors.len(),
                sample
            )));
        }
    };
    let weights = strip_multi_device_prefix(weights);

    let metadata = MetadataOverrides::from_header(&raw.metadata);
    if let Some(classes) = metadata.classes.as_ref() {
        info!("Loaded {} breed classes from checkpoint", classes.len());
    }
    if let Some(name) = metadata.model_name.as_ref() {
        info!("Model name from checkpoint: {}", name);
    }
    let arch_hint = raw.metadata.get("arch").cloned();

    Ok(InterpretedCheckpoint {
        layout,
        weights,
        metadata,
        arch_hint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tensor::WeightTensor;

    fn bare_weights() -> WeightMap {
        let mut w = WeightMap::new();
        w.insert("stem.0.weight".into(), WeightTensor::filled(&[8, 3, 4, 4], 0.1));
        w.insert("stages.0.blocks.0.gamma".into(), WeightTensor::filled(&[8], 1e-6));
        w.insert("head.fc.weight".into(), WeightTensor::filled(&[5, 8], 0.2));
        w.insert("head.fc.bias".into(), WeightTensor::filled(&[5], 0.0));
        w
    }

    fn prefixed(weights: &WeightMap, prefix: &str) -> WeightMap {
        weights
            .iter()
            .map(|(k, v)| (format!("{}{}", prefix, k), v.clone()))
            .collect()
    }

    fn raw(tensors: WeightMap) -> RawCheckpoint {
        RawCheckpoint {
            tensors,
            ..RawCheckpoint::default()
        }
    }

    #[test]
    fn test_all_layouts_yield_same_weights() {
        let expected = bare_weights();

        let bare = interpret(raw(expected.clone())).unwrap();
        assert_eq!(bare.layout, CheckpointLayout::BareWeights);
        assert_eq!(bare.weights, expected);

        for key in ContainerKey::PROBE_ORDER {
            let mut tensors = prefixed(&expected, &format!("{}.", key.name()));
            tensors.insert("optimizer_state_dict.step".into(), WeightTensor::filled(&[1], 3.0));

            let interpreted = interpret(raw(tensors)).unwrap();
            assert_eq!(interpreted.layout, CheckpointLayout::Container(key));
            assert_eq!(interpreted.weights, expected, "layout {}", key.name());
        }
    }

    #[test]
    fn test_probe_order() {
        let mut tensors = prefixed(&bare_weights(), "state_dict.");
        tensors.extend(prefixed(&bare_weights(), "model_state_dict."));
        assert_eq!(
            detect_layout(&tensors),
            CheckpointLayout::Container(ContainerKey::ModelStateDict)
        );

        let mut tensors = prefixed(&bare_weights(), "state_dict.");
        tensors.extend(prefixed(&bare_weights(), "model."));
        assert_eq!(detect_layout(&tensors), CheckpointLayout::Container(ContainerKey::Model));
    }

    #[test]
    fn test_multi_device_prefix_is_normalized() {
        let expected = bare_weights();

        let bare = interpret(raw(prefixed(&expected, "module."))).unwrap();
        assert_eq!(bare.layout, CheckpointLayout::BareWeights);
        assert_eq!(bare.weights, expected);

        let nested = interpret(raw(prefixed(&expected, "state_dict.module."))).unwrap();
        assert_eq!(nested.weights, expected);
    }

    #[test]
    fn test_unrecognized_is_format_error() {
        let mut tensors = WeightMap::new();
        tensors.insert("encoder.layer.0.weight".into(), WeightTensor::filled(&[2], 0.0));

        assert_eq!(detect_layout(&tensors), CheckpointLayout::Unrecognized);
        assert!(matches!(interpret(raw(tensors)), Err(Error::Format(_))));
        assert!(matches!(interpret(RawCheckpoint::default()), Err(Error::Format(_))));
    }

    #[test]
    fn test_header_metadata_is_surfaced() {
        let mut checkpoint = raw(prefixed(&bare_weights(), "model."));
        checkpoint
            .metadata
            .insert("classes".into(), r#"["Gir","Sahiwal"]"#.into());
        checkpoint
            .metadata
            .insert("config".into(), r#"{"num_classes": 2}"#.into());
        checkpoint.metadata.insert("arch".into(), "convnext_base".into());

        let interpreted = interpret(checkpoint).unwrap();
        assert_eq!(interpreted.classes().map(|c| c.len()), Some(2));
        assert_eq!(interpreted.declared_num_classes(), Some(2));
        assert_eq!(interpreted.arch_hint.as_deref(), Some("convnext_base"));
    }
}
