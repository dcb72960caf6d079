//! Model metadata: class names, class count and preprocessing statistics
//!
//! Three sources, highest priority first: metadata embedded in the checkpoint,
//! the optional side file (`model_info.json`), and the hard-coded defaults below.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Default square input resolution
pub const DEFAULT_INPUT_SIZE: usize = 224;

/// Smallest input the ConvNeXt stem and downsampling stages accept (total stride 32)
pub const MIN_INPUT_SIZE: usize = 32;

/// Breed names used when neither the checkpoint nor the side file provides them
pub const DEFAULT_BREEDS: [&str; 41] = [
    "Alambadi",
    "Amritmahal",
    "Ayrshire",
    "Banni",
    "Bargur",
    "Bhadawari",
    "Brown_Swiss",
    "Dangi",
    "Deoni",
    "Gir",
    "Guernsey",
    "Hallikar",
    "Hariana",
    "Holstein_Friesian",
    "Jaffrabadi",
    "Jersey",
    "Kangayam",
    "Kankrej",
    "Kasargod",
    "Kenkatha",
    "Kherigarh",
    "Khillari",
    "Krishna_Valley",
    "Malnad_gidda",
    "Mehsana",
    "Murrah",
    "Nagori",
    "Nagpuri",
    "Nili_Ravi",
    "Nimari",
    "Ongole",
    "Pulikulam",
    "Rathi",
    "Red_Dane",
    "Red_Sindhi",
    "Sahiwal",
    "Surti",
    "Tharparkar",
    "Toda",
    "Umblachery",
    "Vechur",
];

/// Input size given either as a single edge or as `[height, width]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSize {
    Square(usize),
    Dims(Vec<usize>),
}

impl InputSize {
    /// Square edge length: the first of `[h, w]`, the last of `[c, h, w]`
    pub fn edge(&self) -> Option<usize> {
        match self {
            InputSize::Square(s) => Some(*s),
            InputSize::Dims(dims) if dims.len() == 3 => dims.last().copied(),
            InputSize::Dims(dims) => dims.first().copied(),
        }
        .filter(|s| *s > 0)
    }
}

/// Optional metadata fields, shared by the side file and the checkpoint header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataOverrides {
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub num_classes: Option<usize>,
    #[serde(default)]
    pub input_size: Option<InputSize>,
    #[serde(default)]
    pub mean: Option<[f32; 3]>,
    #[serde(default)]
    pub std: Option<[f32; 3]>,
    #[serde(default)]
    pub model_name: Option<String>,
}

impl MetadataOverrides {
    /// Parse checkpoint header metadata.
    ///
    /// `classes` is a JSON array, `num_classes` an integer, `config` a JSON
    /// object whose `num_classes` is used when no direct value is present.
    /// Malformed entries are ignored: the header is only a hint.
    pub fn from_header(header: &BTreeMap<String, String>) -> Self {
        let mut overrides = Self::default();

        if let Some(raw) = header.get("config") {
            match serde_json::from_str::<MetadataOverrides>(raw) {
                Ok(config) => {
                    overrides = config;
                    // classes inside `config` are not a recognized location
                    overrides.classes = None;
                }
                Err(e) => warn!("Ignoring malformed checkpoint config metadata: {}", e),
            }
        }

        if let Some(raw) = header.get("classes") {
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(classes) if !classes.is_empty() => overrides.classes = Some(classes),
                Ok(_) => {}
                Err(e) => warn!("Ignoring malformed checkpoint class list: {}", e),
            }
        }

        if let Some(raw) = header.get("num_classes") {
            match raw.trim().parse::<usize>() {
                Ok(n) => overrides.num_classes = Some(n),
                Err(e) => warn!("Ignoring malformed num_classes {:?}: {}", raw, e),
            }
        }

        overrides
    }
}

/// Metadata of the model being served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Class names, indexed by network output
    pub classes: Vec<String>,
    /// Number of network outputs
    pub num_classes: usize,
    /// Square input resolution
    pub input_size: usize,
    /// Per-channel normalization mean (RGB)
    pub mean: [f32; 3],
    /// Per-channel normalization std (RGB)
    pub std: [f32; 3],
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            classes: DEFAULT_BREEDS.iter().map(|s| s.to_string()).collect(),
            num_classes: DEFAULT_BREEDS.len(),
            input_size: DEFAULT_INPUT_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl ModelInfo {
    /// Defaults overlaid with the side file at `path`, when present.
    ///
    /// A missing file keeps the defaults; an unreadable one keeps the default
    /// class count but drops the class names.
    pub fn from_side_file(path: &Path) -> Self {
        let mut info = Self::default();
        if !path.exists() {
            warn!("{:?} not found, using default model info", path);
            return info;
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<MetadataOverrides>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(overrides) => {
                info.apply(&overrides);
                info!("Loaded model info: {} breeds", info.classes.len());
            }
            Err(e) => {
                warn!("Error loading model info from {:?}: {}, using defaults", path, e);
                info.classes.clear();
            }
        }
        info
    }

    /// Overlay every field that `overrides` provides
    pub fn apply(&mut self, overrides: &MetadataOverrides) {
        if let Some(classes) = overrides.classes.as_ref().filter(|c| !c.is_empty()) {
            self.classes = classes.clone();
        }
        if let Some(n) = overrides.num_classes {
            self.num_classes = n;
        }
        if let Some(edge) = overrides.input_size.as_ref().and_then(InputSize::edge) {
            if edge >= MIN_INPUT_SIZE {
                self.input_size = edge;
            } else {
                warn!(
                    "Ignoring input size {} (minimum {}), keeping {}",
                    edge, MIN_INPUT_SIZE, self.input_size
                );
            }
        }
        if let Some(mean) = overrides.mean {
            self.mean = mean;
        }
        if let Some(std) = overrides.std.filter(|s| s.iter().all(|v| *v > 0.0)) {
            self.std = std;
        }
    }

    /// Label for an output index; `None` when the index is past the class list
    pub fn class_name(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    /// Label for an output index, synthesizing `Class_<index>` when unknown
    pub fn label_for(&self, index: usize) -> String {
        match self.class_name(index) {
            Some(name) => name.to_string(),
            None => {
                warn!(
                    "Output index {} exceeds the {} known classes; metadata and architecture disagree",
                    index,
                    self.classes.len()
                );
                format!("Class_{}", index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let info = ModelInfo::default();
        assert_eq!(info.classes.len(), 41);
        assert_eq!(info.num_classes, 41);
        assert_eq!(info.input_size, 224);
        assert_eq!(info.mean, IMAGENET_MEAN);
    }

    #[test]
    fn test_header_metadata() {
        let mut header = BTreeMap::new();
        header.insert("classes".into(), r#"["Gir","Murrah"]"#.into());
        header.insert("config".into(), r#"{"num_classes": 7, "model_name": "convnext_base"}"#.into());

        let overrides = MetadataOverrides::from_header(&header);
        assert_eq!(overrides.classes, Some(vec!["Gir".to_string(), "Murrah".to_string()]));
        assert_eq!(overrides.num_classes, Some(7));
        assert_eq!(overrides.model_name.as_deref(), Some("convnext_base"));

        // A direct num_classes wins over config.num_classes
        header.insert("num_classes".into(), "2".into());
        assert_eq!(MetadataOverrides::from_header(&header).num_classes, Some(2));
    }

    #[test]
    fn test_header_ignores_empty_and_malformed() {
        let mut header = BTreeMap::new();
        header.insert("classes".into(), "[]".into());
        header.insert("num_classes".into(), "forty".into());
        header.insert("config".into(), "{not json".into());

        assert_eq!(MetadataOverrides::from_header(&header), MetadataOverrides::default());
    }

    #[test]
    fn test_side_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model_info.json");
        std::fs::write(
            &path,
            r#"{"classes": ["A", "B", "C"], "num_classes": 3, "input_size": [32, 32], "mean": [0.5, 0.5, 0.5]}"#,
        )
        .unwrap();

        let info = ModelInfo::from_side_file(&path);
        assert_eq!(info.classes, vec!["A", "B", "C"]);
        assert_eq!(info.num_classes, 3);
        assert_eq!(info.input_size, 32);
        assert_eq!(info.mean, [0.5, 0.5, 0.5]);
        assert_eq!(info.std, IMAGENET_STD);
    }

    #[test]
    fn test_side_file_missing_and_broken() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            ModelInfo::from_side_file(&dir.path().join("absent.json")),
            ModelInfo::default()
        );

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        let info = ModelInfo::from_side_file(&broken);
        assert!(info.classes.is_empty());
        assert_eq!(info.num_classes, 41);
    }

    #[test]
    fn test_label_for_out_of_range() {
        let info = ModelInfo {
            classes: vec!["Gir".into()],
            ..ModelInfo::default()
        };
        assert_eq!(info.label_for(0), "Gir");
        assert_eq!(info.label_for(12), "Class_12");
    }

    #[test]
    fn test_undersized_input_is_ignored() {
        let mut info = ModelInfo::default();
        info.apply(&MetadataOverrides {
            input_size: Some(InputSize::Square(1)),
            ..MetadataOverrides::default()
        });
        assert_eq!(info.input_size, DEFAULT_INPUT_SIZE);

        info.apply(&MetadataOverrides {
            input_size: Some(InputSize::Dims(vec![3, 64, 64])),
            ..MetadataOverrides::default()
        });
        assert_eq!(info.input_size, 64);
    }

    #[test]
    fn test_input_size_forms() {
        assert_eq!(InputSize::Square(160).edge(), Some(160));
        assert_eq!(InputSize::Dims(vec![192, 192]).edge(), Some(192));
        assert_eq!(InputSize::Dims(vec![3, 288, 288]).edge(), Some(288));
        assert_eq!(InputSize::Dims(vec![]).edge(), None);
        assert_eq!(InputSize::Square(0).edge(), None);
    }
}
