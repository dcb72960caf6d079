//! ConvNeXt Architecture for Breed Classification
//!
//! A Burn implementation of the ConvNeXt family whose parameter layout mirrors
//! the checkpoints the service loads (`stem.*`, `stages.N.blocks.M.*`, `head.*`).
//! All variants share one structure and differ only in depths and widths.

use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::gelu, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

// The `Config` derive expects std `Result` in scope
use crate::utils::error::{self, Error};

/// Epsilon used by every normalization layer
const NORM_EPS: f64 = 1e-6;

/// Initial value of the per-block layer scale
const LAYER_SCALE_INIT: f32 = 1e-6;

/// Known ConvNeXt variants, smallest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvNextVariant {
    Atto,
    Femto,
    Pico,
    Nano,
    Tiny,
    Small,
    Base,
    Large,
}

impl ConvNextVariant {
    /// Every variant, ordered by size
    pub const ALL: [ConvNextVariant; 8] = [
        ConvNextVariant::Atto,
        ConvNextVariant::Femto,
        ConvNextVariant::Pico,
        ConvNextVariant::Nano,
        ConvNextVariant::Tiny,
        ConvNextVariant::Small,
        ConvNextVariant::Base,
        ConvNextVariant::Large,
    ];

    /// Blocks per stage
    pub fn depths(&self) -> [usize; 4] {
        match self {
            ConvNextVariant::Atto | ConvNextVariant::Femto | ConvNextVariant::Pico => [2, 2, 6, 2],
            ConvNextVariant::Nano => [2, 2, 8, 2],
            ConvNextVariant::Tiny => [3, 3, 9, 3],
            ConvNextVariant::Small | ConvNextVariant::Base | ConvNextVariant::Large => [3, 3, 27, 3],
        }
    }

    /// Channel width per stage
    pub fn dims(&self) -> [usize; 4] {
        match self {
            ConvNextVariant::Atto => [40, 80, 160, 320],
            ConvNextVariant::Femto => [48, 96, 192, 384],
            ConvNextVariant::Pico => [64, 128, 256, 512],
            ConvNextVariant::Nano => [80, 160, 320, 640],
            ConvNextVariant::Tiny | ConvNextVariant::Small => [96, 192, 384, 768],
            ConvNextVariant::Base => [128, 256, 512, 1024],
            ConvNextVariant::Large => [192, 384, 768, 1536],
        }
    }

    /// Stem output width, the first stage's width
    pub fn stem_width(&self) -> usize {
        self.dims()[0]
    }

    /// Name as used by checkpoint tooling (`convnext_tiny`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            ConvNextVariant::Atto => "convnext_atto",
            ConvNextVariant::Femto => "convnext_femto",
            ConvNextVariant::Pico => "convnext_pico",
            ConvNextVariant::Nano => "convnext_nano",
            ConvNextVariant::Tiny => "convnext_tiny",
            ConvNextVariant::Small => "convnext_small",
            ConvNextVariant::Base => "convnext_base",
            ConvNextVariant::Large => "convnext_large",
        }
    }

    /// Parse `convnext_base`, `base`, `ConvNeXt-Base`, ...
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let short = lower
            .trim_start_matches("convnext")
            .trim_start_matches(['_', '-', ' ']);
        Self::ALL
            .into_iter()
            .find(|v| v.name().trim_start_matches("convnext_") == short)
    }

    /// Approximate parameter count of the feature extractor (head excluded)
    pub fn approx_params(&self) -> usize {
        let dims = self.dims();
        let depths = self.depths();
        let mut total = 3 * dims[0] * 16 + dims[0];
        for stage in 0..4 {
            let d = dims[stage];
            if stage > 0 {
                total += dims[stage - 1] * d * 4 + d;
            }
            // depthwise 7x7, norm, two 4x linears, layer scale
            total += depths[stage] * (d * 49 + d + 2 * d + 8 * d * d + 5 * d + d);
        }
        total
    }
}

impl std::fmt::Display for ConvNextVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for the ConvNeXt classifier
#[derive(Config, Debug)]
pub struct ConvNextConfig {
    /// Blocks per stage
    pub depths: [usize; 4],

    /// Channel width per stage
    pub dims: [usize; 4],

    /// Number of output classes
    #[config(default = "41")]
    pub num_classes: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl ConvNextConfig {
    /// Configuration of a known variant
    pub fn from_variant(variant: ConvNextVariant, num_classes: usize) -> Self {
        Self::new(variant.depths(), variant.dims()).with_num_classes(num_classes)
    }

    /// Check the configuration before allocating anything
    pub fn validate(&self) -> error::Result<()> {
        if self.num_classes == 0 {
            return Err(Error::Config("num_classes must be positive".into()));
        }
        if self.in_channels == 0 {
            return Err(Error::Config("in_channels must be positive".into()));
        }
        if self.dims.iter().any(|d| *d == 0) {
            return Err(Error::Config(format!("stage widths must be positive: {:?}", self.dims)));
        }
        if self.depths.iter().all(|d| *d == 0) {
            return Err(Error::Config("at least one stage needs blocks".into()));
        }
        Ok(())
    }

    /// Validate, then build the network on `device`
    pub fn try_init<B: Backend>(&self, device: &B::Device) -> error::Result<ConvNext<B>> {
        self.validate()?;
        Ok(ConvNext::new(self, device))
    }
}

/// Apply a channels-last LayerNorm to an NCHW tensor
fn layer_norm_2d<B: Backend>(norm: &LayerNorm<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let x = x.permute([0, 2, 3, 1]);
    let x = norm.forward(x);
    x.permute([0, 3, 1, 2])
}

/// Inverted-bottleneck block: depthwise 7x7, LayerNorm, 4x MLP, layer scale, residual
#[derive(Module, Debug)]
pub struct ConvNextBlock<B: Backend> {
    pub conv_dw: Conv2d<B>,
    pub norm: LayerNorm<B>,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub gamma: Param<Tensor<B, 1>>,
}

impl<B: Backend> ConvNextBlock<B> {
    pub fn new(dim: usize, device: &B::Device) -> Self {
        let conv_dw = Conv2dConfig::new([dim, dim], [7, 7])
            .with_groups(dim)
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .init(device);
        let norm = LayerNormConfig::new(dim).with_epsilon(NORM_EPS).init(device);
        let fc1 = LinearConfig::new(dim, 4 * dim).init(device);
        let fc2 = LinearConfig::new(4 * dim, dim).init(device);
        let gamma = Param::from_tensor(Tensor::ones([dim], device).mul_scalar(LAYER_SCALE_INIT));

        Self {
            conv_dw,
            norm,
            fc1,
            fc2,
            gamma,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = x.clone();

        let x = self.conv_dw.forward(x);
        // NCHW -> NHWC so norm and MLP act on channels
        let x = x.permute([0, 2, 3, 1]);
        let x = self.norm.forward(x);
        let x = self.fc1.forward(x);
        let x = gelu(x);
        let x = self.fc2.forward(x);
        let x = x.mul(self.gamma.val().unsqueeze::<4>());
        let x = x.permute([0, 3, 1, 2]);

        shortcut + x
    }
}

/// LayerNorm followed by a 2x2 stride-2 convolution
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub norm: LayerNorm<B>,
    pub conv: Conv2d<B>,
}

impl<B: Backend> Downsample<B> {
    pub fn new(in_dim: usize, out_dim: usize, device: &B::Device) -> Self {
        Self {
            norm: LayerNormConfig::new(in_dim).with_epsilon(NORM_EPS).init(device),
            conv: Conv2dConfig::new([in_dim, out_dim], [2, 2])
                .with_stride([2, 2])
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(layer_norm_2d(&self.norm, x))
    }
}

/// One resolution stage: optional downsampling, then a run of blocks
#[derive(Module, Debug)]
pub struct ConvNextStage<B: Backend> {
    pub downsample: Option<Downsample<B>>,
    pub blocks: Vec<ConvNextBlock<B>>,
}

impl<B: Backend> ConvNextStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = match &self.downsample {
            Some(downsample) => downsample.forward(x),
            None => x,
        };
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

/// ConvNeXt image classifier
///
/// Architecture:
/// - Patchify stem: 4x4 stride-4 convolution + LayerNorm
/// - 4 stages of ConvNeXt blocks, stages 2-4 downsample by 2
/// - Global average pooling, LayerNorm, linear classifier
#[derive(Module, Debug)]
pub struct ConvNext<B: Backend> {
    pub stem_conv: Conv2d<B>,
    pub stem_norm: LayerNorm<B>,
    pub stages: Vec<ConvNextStage<B>>,
    pub head_norm: LayerNorm<B>,
    pub head_fc: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> ConvNext<B> {
    /// Create a new network from configuration
    pub fn new(config: &ConvNextConfig, device: &B::Device) -> Self {
        let dims = config.dims;

        let stem_conv = Conv2dConfig::new([config.in_channels, dims[0]], [4, 4])
            .with_stride([4, 4])
            .init(device);
        let stem_norm = LayerNormConfig::new(dims[0]).with_epsilon(NORM_EPS).init(device);

        let stages = (0..4)
            .map(|i| ConvNextStage {
                downsample: (i > 0).then(|| Downsample::new(dims[i - 1], dims[i], device)),
                blocks: (0..config.depths[i])
                    .map(|_| ConvNextBlock::new(dims[i], device))
                    .collect(),
            })
            .collect();

        let head_norm = LayerNormConfig::new(dims[3]).with_epsilon(NORM_EPS).init(device);
        let head_fc = LinearConfig::new(dims[3], config.num_classes).init(device);

        Self {
            stem_conv,
            stem_norm,
            stages,
            head_norm,
            head_fc,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem_conv.forward(x);
        let mut x = layer_norm_2d(&self.stem_norm, x);

        for stage in &self.stages {
            x = stage.forward(x);
        }

        // Global average pooling: [B, C, H, W] -> [B, C]
        let [batch_size, channels, _, _] = x.dims();
        let x = x.mean_dim(3).mean_dim(2).reshape([batch_size, channels]);

        let x = self.head_norm.forward(x);
        self.head_fc.forward(x)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config(num_classes: usize) -> ConvNextConfig {
        ConvNextConfig::new([1, 1, 1, 1], [8, 16, 24, 32]).with_num_classes(num_classes)
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = tiny_config(5).try_init::<TestBackend>(&device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
        assert_eq!(model.num_classes(), 5);
    }

    #[test]
    fn test_config_serializes() {
        let config = ConvNextConfig::from_variant(ConvNextVariant::Tiny, 7);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["num_classes"], 7);
        assert_eq!(json["in_channels"], 3);

        let parsed: ConvNextConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.dims, ConvNextVariant::Tiny.dims());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_structure_follows_config() {
        let device = Default::default();
        let config = ConvNextConfig::new([2, 1, 3, 1], [8, 16, 24, 32]);
        let model = config.try_init::<TestBackend>(&device).unwrap();

        assert_eq!(model.stages.len(), 4);
        assert!(model.stages[0].downsample.is_none());
        assert!(model.stages[1].downsample.is_some());
        assert_eq!(model.stages[2].blocks.len(), 3);
        assert_eq!(model.stem_conv.weight.dims(), [8, 3, 4, 4]);
        assert_eq!(model.stages[1].blocks[0].conv_dw.weight.dims(), [16, 1, 7, 7]);
        assert_eq!(model.head_fc.weight.dims(), [32, 41]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let device = Default::default();
        assert!(tiny_config(0).try_init::<TestBackend>(&device).is_err());
        assert!(ConvNextConfig::new([0, 0, 0, 0], [8, 16, 24, 32])
            .try_init::<TestBackend>(&device)
            .is_err());
        assert!(ConvNextConfig::new([1, 1, 1, 1], [8, 0, 24, 32])
            .try_init::<TestBackend>(&device)
            .is_err());
    }

    #[test]
    fn test_variant_names_and_order() {
        assert_eq!(ConvNextVariant::from_name("convnext_base"), Some(ConvNextVariant::Base));
        assert_eq!(ConvNextVariant::from_name("Tiny"), Some(ConvNextVariant::Tiny));
        assert_eq!(ConvNextVariant::from_name("ConvNeXt-Small"), Some(ConvNextVariant::Small));
        assert_eq!(ConvNextVariant::from_name("resnet50"), None);

        assert!(ConvNextVariant::Tiny < ConvNextVariant::Base);
        assert!(ConvNextVariant::Tiny.approx_params() < ConvNextVariant::Base.approx_params());
        assert_eq!(ConvNextVariant::Base.stem_width(), 128);
    }
}
