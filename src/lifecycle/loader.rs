//! One load attempt: weights file → ready-to-serve classifier

use std::path::PathBuf;
use std::time::Instant;

use burn::module::Module;
use burn::tensor::backend::Backend;
use tracing::{info, warn};

use super::source::{Downloader, HttpDownloader, WeightsLocator};
use crate::checkpoint::tensor::total_size_bytes;
use crate::checkpoint::{interpret, ModelInfo, RawCheckpoint};
use crate::inference::{BurnClassifier, Classifier, Predictor};
use crate::model::architecture::{build, hinted_variant, resolve, ResolvePolicy};
use crate::model::{loader, LoadReport};
use crate::utils::error::Result;
use crate::utils::format_bytes;

/// A model ready to serve predictions
pub struct LoadedModel {
    pub classifier: Box<dyn Classifier>,
    pub info: ModelInfo,
    /// Name of the variant actually built
    pub architecture: String,
    pub report: LoadReport,
}

impl LoadedModel {
    pub fn predictor(&self) -> Predictor<'_> {
        Predictor::new(self.classifier.as_ref(), &self.info)
    }
}

/// Performs one complete load attempt
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self) -> Result<LoadedModel>;
}

/// Loads a safetensors checkpoint into a Burn ConvNeXt
pub struct CheckpointModelLoader<B: Backend> {
    locator: WeightsLocator,
    info_path: Option<PathBuf>,
    policy: ResolvePolicy,
    downloader: Box<dyn Downloader>,
    device: B::Device,
}

impl<B: Backend> CheckpointModelLoader<B> {
    pub fn new(locator: WeightsLocator, device: B::Device) -> Self {
        Self {
            locator,
            info_path: None,
            policy: ResolvePolicy::default(),
            downloader: Box::new(HttpDownloader),
            device,
        }
    }

    /// Side metadata file overlaid on the defaults
    pub fn with_info_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.info_path = Some(path.into());
        self
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_downloader(mut self, downloader: Box<dyn Downloader>) -> Self {
        self.downloader = downloader;
        self
    }
}

impl<B: Backend> ModelLoader for CheckpointModelLoader<B> {
    fn load(&self) -> Result<LoadedModel> {
        let start = Instant::now();

        let path = self.locator.ensure(self.downloader.as_ref())?;

        let mut info = match &self.info_path {
            Some(p) => ModelInfo::from_side_file(p),
            None => ModelInfo::default(),
        };

        info!("Reading checkpoint {:?}", path);
        let raw = RawCheckpoint::from_file(&path)?;
        let checkpoint = interpret(raw)?;
        info!(
            "Checkpoint layout: {} ({} tensors, {})",
            checkpoint.layout,
            checkpoint.weights.len(),
            format_bytes(total_size_bytes(&checkpoint.weights) as u64)
        );
        let hinted = hinted_variant(
            checkpoint.arch_hint.as_deref(),
            checkpoint.metadata.model_name.as_deref(),
        );
        if let Some(arch) = checkpoint.arch_hint.as_deref() {
            match hinted {
                Some(variant) => info!("Checkpoint architecture hint: {} ({})", arch, variant),
                None => info!("Checkpoint architecture hint: {} (not a known ConvNeXt)", arch),
            }
        }
        info.apply(&checkpoint.metadata);

        let resolution = resolve(
            checkpoint.declared_num_classes().or(Some(info.num_classes)),
            &checkpoint.weights,
            &self.policy,
        );
        info.num_classes = resolution.num_classes;
        if info.classes.len() != info.num_classes {
            warn!(
                "{} class names for {} outputs; unnamed outputs are reported as Class_<index>",
                info.classes.len(),
                info.num_classes
            );
        }

        let (mut network, variant) = build::<B>(&resolution, &self.device);
        if let Some(hinted) = hinted.filter(|h| *h != variant) {
            info!(
                "Checkpoint was trained as {}, serving {}; layers that differ keep their initialization",
                hinted, variant
            );
        }
        let report = loader::apply(&mut network, checkpoint.weights, &self.device);
        report.log();

        let network = network.no_grad();
        let classifier = BurnClassifier::new(network, self.device.clone());

        info!(
            "Model {} ready with {} classes in {:.1}s",
            variant,
            info.num_classes,
            start.elapsed().as_secs_f64()
        );

        Ok(LoadedModel {
            classifier: Box::new(classifier),
            info,
            architecture: variant.name().to_string(),
            report,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::WeightTensor;
    use crate::inference::predictor::tests::png_bytes;
    use crate::model::ConvNextVariant;
    use crate::utils::error::Error;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    pub type TestLoader = CheckpointModelLoader<NdArray<f32>>;

    /// Checkpoint holding only a classifier head for the atto variant
    pub fn write_head_checkpoint(path: &std::path::Path, prefix: &str, classes: usize) {
        let width = ConvNextVariant::Atto.dims()[3];
        let mut raw = RawCheckpoint::default();
        raw.tensors.insert(
            format!("{prefix}head.fc.weight"),
            WeightTensor::filled(&[classes, width], 0.01),
        );
        let mut bias = WeightTensor::filled(&[classes], 0.0);
        bias.values[classes - 1] = 5.0;
        raw.tensors.insert(format!("{prefix}head.fc.bias"), bias);
        raw.write_file(path).unwrap();
    }

    pub fn atto_policy() -> ResolvePolicy {
        ResolvePolicy::SmallestCandidate {
            candidates: vec![ConvNextVariant::Atto],
        }
    }

    #[test]
    fn test_load_reconciles_class_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.safetensors");
        write_head_checkpoint(&path, "model_state_dict.module.", 3);

        let info_path = dir.path().join("model_info.json");
        std::fs::write(&info_path, r#"{"classes": ["Gir", "Murrah"], "num_classes": 2, "input_size": 32}"#)
            .unwrap();

        let loader = TestLoader::new(WeightsLocator::new(&path, None), Default::default())
            .with_info_path(&info_path)
            .with_policy(atto_policy());
        let model = loader.load().unwrap();

        assert_eq!(model.architecture, "convnext_atto");
        assert_eq!(model.info.num_classes, 3);
        assert_eq!(model.classifier.num_classes(), 3);
        assert_eq!(model.report.applied, 2);
        assert!(!model.report.missing.is_empty());

        let predictions = model.predictor().predict(&png_bytes()).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].breed, "Class_2");
    }

    #[test]
    fn test_missing_weights_without_url() {
        let dir = TempDir::new().unwrap();
        let loader = TestLoader::new(
            WeightsLocator::new(dir.path().join("absent.safetensors"), None),
            Default::default(),
        );
        assert!(matches!(loader.load(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_corrupt_checkpoint_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.safetensors");
        std::fs::write(&path, b"\x10\x00\x00\x00\x00\x00\x00\x00garbage").unwrap();

        let loader = TestLoader::new(WeightsLocator::new(&path, None), Default::default());
        assert!(matches!(loader.load(), Err(Error::Format(_))));
    }
}
