//! Burn Dataset and Batcher for leaf images
//!
//! Items are decoded lazily from disk. Training items can be passed through an
//! [`Augmenter`] with a caller-supplied RNG, so the trainer controls the seed.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::DynamicImage;
use rand_chacha::ChaCha8Rng;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::loader::{image_to_chw, open_image, ImageSample};
use crate::utils::error::Result;

/// A single image ready for batching
#[derive(Clone, Debug)]
pub struct LeafItem {
    /// CHW floats in `[0, 1]`, length `3 * size * size`
    pub image: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

/// Lazily loaded labelled images
#[derive(Debug, Clone)]
pub struct LeafImageDataset {
    samples: Vec<ImageSample>,
    image_size: usize,
    augmenter: Option<Augmenter>,
}

impl LeafImageDataset {
    pub fn new(samples: Vec<ImageSample>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            augmenter: None,
        }
    }

    /// Apply `augmenter` whenever an RNG is passed to [`Self::load_item`]
    pub fn with_augmenter(mut self, augmenter: Augmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Decode sample `index`, augmenting it when both an augmenter and `rng` are present
    pub fn load_item(
        &self,
        index: usize,
        rng: Option<&mut ChaCha8Rng>,
    ) -> Result<Option<LeafItem>> {
        let Some(sample) = self.samples.get(index) else {
            return Ok(None);
        };

        let img = open_image(&sample.path)?;
        let img = match (&self.augmenter, rng) {
            (Some(augmenter), Some(rng)) => {
                let resized = img.resize_exact(
                    self.image_size as u32,
                    self.image_size as u32,
                    image::imageops::FilterType::Triangle,
                );
                DynamicImage::ImageRgb8(augmenter.augment(&resized.to_rgb8(), rng))
            }
            _ => img,
        };

        Ok(Some(LeafItem {
            image: image_to_chw(&img, self.image_size),
            label: sample.label,
            path: sample.path.clone(),
        }))
    }

    /// Samples per class index
    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for sample in &self.samples {
            if sample.label < num_classes {
                counts[sample.label] += 1;
            }
        }
        counts
    }
}

impl Dataset<LeafItem> for LeafImageDataset {
    fn get(&self, index: usize) -> Option<LeafItem> {
        match self.load_item(index, None) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images and their labels
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stack CHW float buffers into a `[n, 3, size, size]` tensor
pub fn images_to_tensor<B: Backend>(
    images: Vec<f32>,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 4>::from_floats(
        TensorData::new(images, [batch_size, 3, image_size, image_size]),
        device,
    )
}

#[derive(Clone, Debug)]
pub struct LeafBatcher {
    image_size: usize,
}

impl LeafBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, LeafItem, LeafBatch<B>> for LeafBatcher {
    fn batch(&self, items: Vec<LeafItem>, device: &B::Device) -> LeafBatch<B> {
        let batch_size = items.len();

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let images_data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        let images = images_to_tensor::<B>(images_data, batch_size, self.image_size, device);
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LeafBatch { images, targets }
    }
}
