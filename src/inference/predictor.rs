//! Inference Predictor Module
//!
//! Runs preprocessed images through a [`Classifier`] and turns the logits into
//! ranked breed predictions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::preprocess::Preprocessor;
use crate::checkpoint::{ModelInfo, MIN_INPUT_SIZE};
use crate::model::ConvNext;
use crate::utils::error::{Error, Result};

/// Number of predictions returned per image
pub const TOP_K: usize = 5;

/// A network that maps one CHW image to class logits
pub trait Classifier: Send + Sync {
    /// Number of outputs
    fn num_classes(&self) -> usize;

    /// Logits for a normalized `[3, image_size, image_size]` input
    fn logits(&self, input: &[f32], image_size: usize) -> Result<Vec<f32>>;
}

/// [`Classifier`] backed by a Burn ConvNeXt
///
/// Forward passes are serialized through a mutex. A failed pass leaves the
/// model usable: panics become errors and a poisoned lock is recovered.
pub struct BurnClassifier<B: Backend> {
    model: Mutex<ConvNext<B>>,
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> BurnClassifier<B> {
    pub fn new(model: ConvNext<B>, device: B::Device) -> Self {
        let num_classes = model.num_classes();
        Self {
            model: Mutex::new(model),
            device,
            num_classes,
        }
    }
}

impl<B: Backend> Classifier for BurnClassifier<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn logits(&self, input: &[f32], image_size: usize) -> Result<Vec<f32>> {
        if image_size < MIN_INPUT_SIZE {
            return Err(Error::Inference(format!(
                "input size {} is below the network minimum of {}",
                image_size, MIN_INPUT_SIZE
            )));
        }
        let expected = 3 * image_size * image_size;
        if input.len() != expected {
            return Err(Error::Inference(format!(
                "expected {} input values for a {}x{} image, got {}",
                expected,
                image_size,
                image_size,
                input.len()
            )));
        }

        let tensor = Tensor::<B, 4>::from_data(
            TensorData::new(input.to_vec(), [1, 3, image_size, image_size]),
            &self.device,
        );

        // The weights are read-only during a forward pass, so a poisoned
        // lock still guards a consistent model
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        let output = catch_unwind(AssertUnwindSafe(|| model.forward(tensor)));
        drop(model);
        let output = output.map_err(|panic| {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Error::Inference(format!("forward pass panicked: {}", detail))
        })?;

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::Inference(format!("failed to read logits: {:?}", e)))
    }
}

/// One ranked prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub breed: String,
    pub confidence: f32,
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|v| v / sum).collect()
    } else {
        exps
    }
}

/// Indices and values of the `k` largest probabilities, descending
pub fn top_k(probabilities: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}

/// Runs the full pipeline for a loaded model
pub struct Predictor<'a> {
    classifier: &'a dyn Classifier,
    info: &'a ModelInfo,
    preprocessor: Preprocessor,
}

impl<'a> Predictor<'a> {
    pub fn new(classifier: &'a dyn Classifier, info: &'a ModelInfo) -> Self {
        Self {
            classifier,
            info,
            preprocessor: Preprocessor::from_info(info),
        }
    }

    /// Class probabilities for uploaded image bytes
    pub fn probabilities(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let start = Instant::now();
        let input = self.preprocessor.process_bytes(bytes)?;
        let logits = self
            .classifier
            .logits(&input, self.preprocessor.image_size as usize)?;
        debug!("Inference took {:.2} ms", start.elapsed().as_secs_f64() * 1000.0);
        Ok(softmax(&logits))
    }

    /// Top-5 predictions, most confident first
    pub fn predict(&self, bytes: &[u8]) -> Result<Vec<Prediction>> {
        let probabilities = self.probabilities(bytes)?;
        Ok(top_k(&probabilities, TOP_K)
            .into_iter()
            .map(|(idx, confidence)| Prediction {
                breed: self.info.label_for(idx),
                confidence,
            })
            .collect())
    }

    /// Best prediction only
    pub fn predict_top1(&self, bytes: &[u8]) -> Result<Prediction> {
        let probabilities = self.probabilities(bytes)?;
        let (idx, confidence) = top_k(&probabilities, 1)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Inference("classifier produced no outputs".into()))?;
        Ok(Prediction {
            breed: self.info.label_for(idx),
            confidence,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::ConvNextConfig;
    use burn_ndarray::NdArray;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    /// Classifier returning fixed logits
    pub struct FixedLogits(pub Vec<f32>);

    impl Classifier for FixedLogits {
        fn num_classes(&self) -> usize {
            self.0.len()
        }

        fn logits(&self, _input: &[f32], _image_size: usize) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    pub fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(12, 9, Rgb([120, 80, 40]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn info(classes: &[&str]) -> ModelInfo {
        ModelInfo {
            classes: classes.iter().map(|s| s.to_string()).collect(),
            num_classes: classes.len(),
            input_size: 8,
            ..ModelInfo::default()
        }
    }

    #[test]
    fn test_softmax() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);

        let big = softmax(&[1000.0, 1000.0]);
        assert!((big[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_predict_returns_top5_descending() {
        let classifier = FixedLogits(vec![0.1, 3.0, 0.5, 2.0, -1.0, 1.0, 0.0]);
        let info = info(&["A", "B", "C", "D", "E", "F", "G"]);
        let predictions = Predictor::new(&classifier, &info).predict(&png_bytes()).unwrap();

        assert_eq!(predictions.len(), TOP_K);
        assert_eq!(predictions[0].breed, "B");
        assert_eq!(predictions[1].breed, "D");
        assert!(predictions.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        let total: f32 = predictions.iter().map(|p| p.confidence).sum();
        assert!(total <= 1.0 + 1e-6);
    }

    #[test]
    fn test_fewer_classes_than_top_k() {
        let classifier = FixedLogits(vec![0.0, 1.0]);
        let info = info(&["A", "B"]);
        let predictions = Predictor::new(&classifier, &info).predict(&png_bytes()).unwrap();
        assert_eq!(predictions.len(), 2);
    }

    #[test]
    fn test_out_of_range_index_is_synthesized() {
        let classifier = FixedLogits(vec![0.0, 0.0, 9.0]);
        let info = info(&["A", "B"]);
        let top = Predictor::new(&classifier, &info).predict_top1(&png_bytes()).unwrap();
        assert_eq!(top.breed, "Class_2");
    }

    #[test]
    fn test_bad_image_is_error() {
        let classifier = FixedLogits(vec![1.0]);
        let info = info(&["A"]);
        assert!(Predictor::new(&classifier, &info).predict(b"nope").is_err());
    }

    #[test]
    fn test_burn_classifier() {
        let device = Default::default();
        let model = ConvNextConfig::new([1, 1, 1, 1], [4, 8, 8, 8])
            .with_num_classes(3)
            .try_init::<NdArray<f32>>(&device)
            .unwrap();
        let classifier = BurnClassifier::new(model, device);
        assert_eq!(classifier.num_classes(), 3);

        let logits = classifier.logits(&vec![0.0; 3 * 32 * 32], 32).unwrap();
        assert_eq!(logits.len(), 3);
        assert!(classifier.logits(&[0.0; 10], 32).is_err());
    }

    #[test]
    fn test_failed_inference_keeps_model_usable() {
        let device = Default::default();
        let model = ConvNextConfig::new([1, 1, 1, 1], [4, 8, 8, 8])
            .with_num_classes(3)
            .try_init::<NdArray<f32>>(&device)
            .unwrap();
        let classifier = Arc::new(BurnClassifier::new(model, device));

        // too small for the stem and three downsamplings
        assert!(matches!(classifier.logits(&[0.0; 3], 1), Err(Error::Inference(_))));

        let poisoner = Arc::clone(&classifier);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.model.lock().unwrap();
            panic!("forward pass blew up");
        })
        .join();
        assert!(joined.is_err());
        assert!(classifier.model.is_poisoned());

        let logits = classifier.logits(&vec![0.5; 3 * 32 * 32], 32).unwrap();
        assert_eq!(logits.len(), 3);
    }
}
