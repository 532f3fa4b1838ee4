//! Classifier network for leaf images
//!
//! The network is split into a convolutional feature extractor (the part a
//! pretrained backbone is loaded into) and a small classification head:
//! global average pooling, a dense ReLU layer, dropout and the output layer.
//! Freezing is expressed as a [`Trainability`] value consumed by the trainer
//! rather than as state inside the module.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::utils::error::Error;

/// Architecture of a [`PlantClassifier`]; persisted in the checkpoint manifest
#[derive(Config, Debug)]
pub struct PlantClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Output channels of each feature-extractor block
    #[config(default = "vec![16, 32, 64, 128, 256]")]
    pub backbone_filters: Vec<usize>,

    /// Width of the dense layer in the head
    #[config(default = "128")]
    pub hidden_units: usize,

    /// Dropout rate in the head
    #[config(default = "0.3")]
    pub dropout: f64,
}

impl PlantClassifierConfig {
    /// Channels produced by the feature extractor
    pub fn feature_channels(&self) -> usize {
        self.backbone_filters
            .last()
            .copied()
            .unwrap_or(self.in_channels)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PlantClassifier<B> {
        PlantClassifier::new(self, device)
    }

    /// Fails when `size` pixels would pool down to nothing in the feature extractor
    pub fn check_input_size(&self, size: usize) -> crate::utils::error::Result<()> {
        check_input_size(self.backbone_filters.len(), size)
    }
}

/// Each block halves the resolution, so `num_blocks` blocks need at least `2^num_blocks` pixels
pub fn check_input_size(num_blocks: usize, size: usize) -> crate::utils::error::Result<()> {
    let remaining = u32::try_from(num_blocks)
        .ok()
        .and_then(|blocks| size.checked_shr(blocks))
        .unwrap_or(0);

    if remaining == 0 {
        return Err(Error::Config(format!(
            "Input size {}px is too small for {} backbone blocks",
            size, num_blocks
        )));
    }
    Ok(())
}

/// Conv -> BatchNorm -> ReLU -> 2x2 MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Stack of convolutional blocks; each block halves the spatial resolution
#[derive(Module, Debug)]
pub struct FeatureExtractor<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> FeatureExtractor<B> {
    pub fn new(in_channels: usize, filters: &[usize], device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(filters.len());
        let mut channels = in_channels;
        for &out in filters {
            blocks.push(ConvBlock::new(channels, out, device));
            channels = out;
        }
        Self { blocks }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Global pooling, dense ReLU layer, dropout and the output layer
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
    pub relu: Relu,
    pub dropout: Dropout,
    pub predictions: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(
        in_features: usize,
        hidden_units: usize,
        dropout: f64,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_features, hidden_units).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(dropout).init(),
            predictions: LinearConfig::new(hidden_units, num_classes).init(device),
        }
    }

    /// `[B, C, H, W]` feature maps to `[B, num_classes]` logits
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.predictions.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        // Linear weights are stored as [d_input, d_output]
        self.predictions.weight.dims()[1]
    }
}

/// Structural role of a layer, used by the unfreeze policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    FeatureExtractor,
    Head,
}

/// Named layer with its role, in forward order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub role: LayerRole,
}

/// Which parameters an optimizer step may update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trainability {
    /// The classification head is updated
    pub head: bool,
    /// Feature-extractor blocks with index `>= n` are updated; `None` freezes all of them
    pub backbone_from: Option<usize>,
}

impl Trainability {
    /// Only the head trains
    pub fn head_only() -> Self {
        Self {
            head: true,
            backbone_from: None,
        }
    }

    /// Whether feature-extractor block `index` is trainable
    pub fn block_trainable(&self, index: usize) -> bool {
        self.backbone_from.map(|from| index >= from).unwrap_or(false)
    }
}

/// Unfreeze feature-extractor layers from `fine_tune_at` onward; the head stays trainable.
///
/// Fails when `layers` contains no feature-extractor layer.
pub fn unfreeze_from(
    layers: &[LayerInfo],
    fine_tune_at: usize,
) -> crate::utils::error::Result<Trainability> {
    let feature_layers = layers
        .iter()
        .filter(|layer| layer.role == LayerRole::FeatureExtractor)
        .count();

    if feature_layers == 0 {
        return Err(Error::Model(
            "Model has no feature-extractor layers to unfreeze".to_string(),
        ));
    }

    if fine_tune_at >= feature_layers {
        tracing::warn!(
            "fine_tune_at={} but the feature extractor has only {} layers; nothing unfrozen",
            fine_tune_at,
            feature_layers
        );
        return Ok(Trainability::head_only());
    }

    Ok(Trainability {
        head: true,
        backbone_from: Some(fine_tune_at),
    })
}

/// Plant disease classifier: feature extractor plus classification head
#[derive(Module, Debug)]
pub struct PlantClassifier<B: Backend> {
    pub backbone: FeatureExtractor<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> PlantClassifier<B> {
    /// Build a randomly initialised classifier
    pub fn new(config: &PlantClassifierConfig, device: &B::Device) -> Self {
        let backbone = FeatureExtractor::new(config.in_channels, &config.backbone_filters, device);
        let head = ClassifierHead::new(
            config.feature_channels(),
            config.hidden_units,
            config.dropout,
            config.num_classes,
            device,
        );
        Self { backbone, head }
    }

    /// Build a classifier around existing feature-extractor weights
    pub fn with_backbone(
        backbone: FeatureExtractor<B>,
        config: &PlantClassifierConfig,
        device: &B::Device,
    ) -> Self {
        let head = ClassifierHead::new(
            config.feature_channels(),
            config.hidden_units,
            config.dropout,
            config.num_classes,
            device,
        );
        Self { backbone, head }
    }

    /// Replace the head with a fresh one sized for `config.num_classes`.
    ///
    /// Every feature-extractor weight is kept; the old head is dropped.
    pub fn adapt(self, config: &PlantClassifierConfig, device: &B::Device) -> Self {
        Self::with_backbone(self.backbone, config, device)
    }

    /// Logits of shape `[batch_size, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    /// Layers in forward order with their structural roles
    pub fn layer_roles(&self) -> Vec<LayerInfo> {
        let mut layers: Vec<LayerInfo> = (0..self.backbone.num_blocks())
            .map(|i| LayerInfo {
                name: format!("backbone.block{}", i),
                role: LayerRole::FeatureExtractor,
            })
            .collect();

        for name in ["head.fc", "head.predictions"] {
            layers.push(LayerInfo {
                name: name.to_string(),
                role: LayerRole::Head,
            });
        }
        layers
    }
}
