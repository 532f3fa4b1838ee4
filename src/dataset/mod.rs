//! Dataset module
//!
//! - `organize`: reshaping raw dataset folders on disk
//! - `labels`: the class name <-> index registry
//! - `loader`: directory scanning, train/validation split, image decoding
//! - `burn_dataset`: Burn `Dataset` / `Batcher` implementations
//! - `augmentation`: training-time random transforms

pub mod augmentation;
pub mod burn_dataset;
pub mod labels;
pub mod loader;
pub mod organize;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{LeafBatch, LeafBatcher, LeafImageDataset, LeafItem};
pub use labels::LabelRegistry;
pub use loader::{scan_labelled, split_per_class, ImageSample};
