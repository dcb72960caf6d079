//! Non-strict weight loading
//!
//! Copies a checkpoint's weights mapping into a freshly built [`ConvNext`].
//! Loading never fails: parameters without a usable weight keep their
//! initialization and everything that did not fit is reported.

use burn::{
    module::Param,
    nn::{conv::Conv2d, LayerNorm, Linear},
    tensor::{backend::Backend, Tensor, TensorData},
};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::convnext::{ConvNext, ConvNextBlock};
use crate::checkpoint::{WeightMap, WeightTensor};

/// How many names to include when logging a report
const LOG_SAMPLE: usize = 5;

/// What happened to each parameter during loading
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Parameters overwritten from the checkpoint
    pub applied: usize,
    /// Network parameters with no checkpoint entry
    pub missing: Vec<String>,
    /// Checkpoint entries that were not applied
    pub unexpected: Vec<String>,
    /// Entries skipped because their shape differs from the parameter
    pub mismatched: Vec<String>,
}

impl LoadReport {
    /// Every parameter was loaded and every entry was used
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} missing, {} unexpected, {} mismatched",
            self.applied,
            self.missing.len(),
            self.unexpected.len(),
            self.mismatched.len()
        )
    }

    pub fn log(&self) {
        if self.is_exact() {
            info!("Weights loaded: {}", self.summary());
            return;
        }
        warn!("Weights loaded non-strictly: {}", self.summary());
        if !self.missing.is_empty() {
            warn!("Missing (first {}): {:?}", LOG_SAMPLE, sample(&self.missing));
        }
        if !self.mismatched.is_empty() {
            warn!("Shape mismatches (first {}): {:?}", LOG_SAMPLE, sample(&self.mismatched));
        }
        if !self.unexpected.is_empty() {
            debug!("Unexpected (first {}): {:?}", LOG_SAMPLE, sample(&self.unexpected));
        }
    }
}

fn sample(names: &[String]) -> &[String] {
    &names[..names.len().min(LOG_SAMPLE)]
}

/// Apply `weights` to `network`, consuming the mapping as entries are used.
///
/// Key layout: `stem.0` conv, `stem.1` norm, `stages.N.downsample.{0,1}`
/// norm/conv, `stages.N.blocks.M.{conv_dw, norm, mlp.fc1, mlp.fc2, gamma}`,
/// `head.norm`, `head.fc`.
pub fn apply<B: Backend>(
    network: &mut ConvNext<B>,
    weights: WeightMap,
    device: &B::Device,
) -> LoadReport {
    let mut cursor = WeightCursor::<B> {
        weights,
        device,
        report: LoadReport::default(),
    };

    cursor.conv(&mut network.stem_conv, "stem.0");
    cursor.norm(&mut network.stem_norm, "stem.1");

    for (i, stage) in network.stages.iter_mut().enumerate() {
        if let Some(downsample) = stage.downsample.as_mut() {
            cursor.norm(&mut downsample.norm, &format!("stages.{}.downsample.0", i));
            cursor.conv(&mut downsample.conv, &format!("stages.{}.downsample.1", i));
        }
        for (j, block) in stage.blocks.iter_mut().enumerate() {
            cursor.block(block, &format!("stages.{}.blocks.{}", i, j));
        }
    }

    cursor.norm(&mut network.head_norm, "head.norm");
    cursor.linear(&mut network.head_fc, "head.fc");

    cursor.finish()
}

struct WeightCursor<'a, B: Backend> {
    weights: WeightMap,
    device: &'a B::Device,
    report: LoadReport,
}

impl<B: Backend> WeightCursor<'_, B> {
    fn block(&mut self, block: &mut ConvNextBlock<B>, prefix: &str) {
        self.conv(&mut block.conv_dw, &format!("{}.conv_dw", prefix));
        self.norm(&mut block.norm, &format!("{}.norm", prefix));
        self.linear(&mut block.fc1, &format!("{}.mlp.fc1", prefix));
        self.linear(&mut block.fc2, &format!("{}.mlp.fc2", prefix));
        self.param(&mut block.gamma, &format!("{}.gamma", prefix));
    }

    fn conv(&mut self, conv: &mut Conv2d<B>, prefix: &str) {
        self.param(&mut conv.weight, &format!("{}.weight", prefix));
        if let Some(bias) = conv.bias.as_mut() {
            self.param(bias, &format!("{}.bias", prefix));
        }
    }

    fn norm(&mut self, norm: &mut LayerNorm<B>, prefix: &str) {
        self.param(&mut norm.gamma, &format!("{}.weight", prefix));
        self.param(&mut norm.beta, &format!("{}.bias", prefix));
    }

    /// Linear weights are stored `[out, in]` (or `[out, in, 1, 1]`); burn wants `[in, out]`
    fn linear(&mut self, linear: &mut Linear<B>, prefix: &str) {
        let key = format!("{}.weight", prefix);
        let [d_in, d_out] = linear.weight.val().dims();

        if let Some(entry) = self.take(&key) {
            let stored = match entry.shape.as_slice() {
                [out, inp] | [out, inp, 1, 1] => Some((*out, *inp)),
                _ => None,
            };
            if stored == Some((d_out, d_in)) {
                let tensor = Tensor::<B, 2>::from_data(
                    TensorData::new(entry.values, [d_out, d_in]),
                    self.device,
                )
                .transpose();
                linear.weight = Param::from_tensor(tensor);
                self.report.applied += 1;
            } else {
                self.mismatch(key, &entry.shape, &[d_out, d_in]);
            }
        }

        if let Some(bias) = linear.bias.as_mut() {
            self.param(bias, &format!("{}.bias", prefix));
        }
    }

    fn param<const D: usize>(&mut self, param: &mut Param<Tensor<B, D>>, key: &str) {
        let expected = param.val().dims();
        let Some(entry) = self.take(key) else {
            return;
        };
        if entry.shape.as_slice() != expected.as_slice() {
            self.mismatch(key.to_string(), &entry.shape, &expected);
            return;
        }
        let tensor = Tensor::<B, D>::from_data(TensorData::new(entry.values, expected), self.device);
        *param = Param::from_tensor(tensor);
        self.report.applied += 1;
    }

    /// Remove `key` from the mapping, recording it as missing when absent
    fn take(&mut self, key: &str) -> Option<WeightTensor> {
        let entry = self.weights.remove(key);
        if entry.is_none() {
            self.report.missing.push(key.to_string());
        }
        entry
    }

    fn mismatch(&mut self, key: String, stored: &[usize], expected: &[usize]) {
        debug!("Skipping {}: checkpoint {:?}, network {:?}", key, stored, expected);
        self.report.mismatched.push(key.clone());
        self.report.unexpected.push(key);
    }

    fn finish(mut self) -> LoadReport {
        self.report.unexpected.extend(self.weights.into_keys());
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::convnext::ConvNextConfig;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_config(num_classes: usize) -> ConvNextConfig {
        ConvNextConfig::new([1, 1, 1, 1], [4, 8, 8, 8]).with_num_classes(num_classes)
    }

    /// Export a network's parameters in checkpoint layout
    fn export(network: &ConvNext<TestBackend>) -> WeightMap {
        fn put<const D: usize>(w: &mut WeightMap, key: String, t: Tensor<TestBackend, D>) {
            let shape = t.dims().to_vec();
            let values: Vec<f32> = t.into_data().to_vec().unwrap();
            w.insert(key, WeightTensor::new(shape, values).unwrap());
        }
        fn put_conv(w: &mut WeightMap, prefix: &str, conv: &Conv2d<TestBackend>) {
            put(w, format!("{prefix}.weight"), conv.weight.val());
            if let Some(b) = &conv.bias {
                put(w, format!("{prefix}.bias"), b.val());
            }
        }
        fn put_norm(w: &mut WeightMap, prefix: &str, norm: &LayerNorm<TestBackend>) {
            put(w, format!("{prefix}.weight"), norm.gamma.val());
            put(w, format!("{prefix}.bias"), norm.beta.val());
        }
        fn put_linear(w: &mut WeightMap, prefix: &str, linear: &Linear<TestBackend>) {
            put(w, format!("{prefix}.weight"), linear.weight.val().transpose());
            if let Some(b) = &linear.bias {
                put(w, format!("{prefix}.bias"), b.val());
            }
        }

        let mut w = WeightMap::new();
        put_conv(&mut w, "stem.0", &network.stem_conv);
        put_norm(&mut w, "stem.1", &network.stem_norm);
        for (i, stage) in network.stages.iter().enumerate() {
            if let Some(d) = &stage.downsample {
                put_norm(&mut w, &format!("stages.{i}.downsample.0"), &d.norm);
                put_conv(&mut w, &format!("stages.{i}.downsample.1"), &d.conv);
            }
            for (j, block) in stage.blocks.iter().enumerate() {
                let p = format!("stages.{i}.blocks.{j}");
                put_conv(&mut w, &format!("{p}.conv_dw"), &block.conv_dw);
                put_norm(&mut w, &format!("{p}.norm"), &block.norm);
                put_linear(&mut w, &format!("{p}.mlp.fc1"), &block.fc1);
                put_linear(&mut w, &format!("{p}.mlp.fc2"), &block.fc2);
                put(&mut w, format!("{p}.gamma"), block.gamma.val());
            }
        }
        put_norm(&mut w, "head.norm", &network.head_norm);
        put_linear(&mut w, "head.fc", &network.head_fc);
        w
    }

    fn logits(network: &ConvNext<TestBackend>) -> Vec<f32> {
        let device = Default::default();
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        network.forward(input).into_data().to_vec().unwrap()
    }

    #[test]
    fn test_exact_load_reproduces_outputs() {
        let device = Default::default();
        let source = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let weights = export(&source);
        let total = weights.len();

        let mut target = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let report = apply(&mut target, weights, &device);

        assert!(report.is_exact(), "{}", report.summary());
        assert_eq!(report.applied, total);
        let (a, b) = (logits(&source), logits(&target));
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_missing_and_unexpected_are_reported() {
        let device = Default::default();
        let source = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let mut weights = export(&source);
        weights.remove("head.norm.bias");
        weights.insert("aux.classifier.weight".into(), WeightTensor::filled(&[2, 2], 0.0));

        let mut target = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let report = apply(&mut target, weights, &device);

        assert_eq!(report.missing, vec!["head.norm.bias".to_string()]);
        assert_eq!(report.unexpected, vec!["aux.classifier.weight".to_string()]);
        assert!(report.mismatched.is_empty());
    }

    #[test]
    fn test_shape_mismatch_is_skipped() {
        let device = Default::default();
        let source = small_config(5).try_init::<TestBackend>(&device).unwrap();
        let weights = export(&source);

        let mut target = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let report = apply(&mut target, weights, &device);

        assert!(report.mismatched.contains(&"head.fc.weight".to_string()));
        assert!(report.mismatched.contains(&"head.fc.bias".to_string()));
        assert!(report.unexpected.contains(&"head.fc.weight".to_string()));
        assert_eq!(target.head_fc.weight.dims(), [8, 3]);
    }

    #[test]
    fn test_conv_form_linear_weight_is_accepted() {
        let device = Default::default();
        let source = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let mut weights = export(&source);
        let head = weights.remove("head.fc.weight").unwrap();
        weights.insert(
            "head.fc.weight".into(),
            WeightTensor::new(vec![3, 8, 1, 1], head.values).unwrap(),
        );

        let mut target = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let report = apply(&mut target, weights, &device);
        assert!(report.is_exact(), "{}", report.summary());
    }

    #[test]
    fn test_extra_blocks_are_unexpected() {
        let device = Default::default();
        let deep = ConvNextConfig::new([1, 1, 3, 1], [4, 8, 8, 8]).with_num_classes(3);
        let source = deep.try_init::<TestBackend>(&device).unwrap();

        let mut target = small_config(3).try_init::<TestBackend>(&device).unwrap();
        let report = apply(&mut target, export(&source), &device);

        assert!(report.missing.is_empty());
        assert!(report
            .unexpected
            .iter()
            .any(|k| k.starts_with("stages.2.blocks.2.")));
    }
}
