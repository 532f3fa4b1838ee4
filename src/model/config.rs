//! Pipeline Configuration Module
//!
//! A single serde record carrying every path and hyperparameter the pipeline
//! needs. It is built once at start-up (defaults, then an optional JSON file,
//! then CLI overrides), validated, and passed around by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::cnn::check_input_size;
use crate::utils::error::{Error, Result};

/// Configuration for dataset locations, artifacts and training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory per class
    pub train_dir: PathBuf,

    /// Checkpoint stem; weights live at `<stem>.mpk`, the manifest at `<stem>.json`
    pub model_path: PathBuf,

    /// Label registry JSON
    pub label_path: PathBuf,

    /// Training history JSON
    pub history_path: PathBuf,

    /// Square input resolution
    pub image_size: usize,

    pub batch_size: usize,

    /// Total epochs across both phases of `train`
    pub epochs: usize,

    /// Warm-up learning rate; fine-tuning uses a tenth of it
    pub learning_rate: f64,

    /// Early-stopping patience on `val_loss`
    pub patience: usize,

    /// Floor for reduce-on-plateau
    pub min_lr: f64,
    pub plateau_factor: f64,
    pub plateau_patience: usize,

    /// First feature-extractor layer unfrozen for fine-tuning
    pub fine_tune_at: usize,

    /// Epochs for `resume`
    pub fine_tune_epochs: usize,

    /// Learning rate for `resume`
    pub fine_tune_lr: f64,

    /// First feature-extractor layer unfrozen by `resume` (0 = whole backbone)
    pub resume_unfreeze_from: usize,

    /// Fraction of each class held out for validation
    pub validation_split: f64,

    /// Random flips, rotations and zooms on training images
    pub augment: bool,

    /// Seed for shuffling, splitting and augmentation
    pub seed: u64,

    /// Width of the dense layer in the classification head
    pub hidden_units: usize,

    /// Dropout rate in the classification head
    pub dropout: f64,

    /// Output channels of each feature-extractor block
    pub backbone_filters: Vec<usize>,

    /// Optional backbone weights (see `plant-disease export --backbone`)
    pub pretrained_backbone: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            model_path: PathBuf::from("models/plant_disease_model"),
            label_path: PathBuf::from("models/labels.json"),
            history_path: PathBuf::from("models/history.json"),
            image_size: 224,
            batch_size: 16,
            epochs: 10,
            learning_rate: 1e-4,
            patience: 5,
            min_lr: 1e-7,
            plateau_factor: 0.2,
            plateau_patience: 3,
            fine_tune_at: 3,
            fine_tune_epochs: 3,
            fine_tune_lr: 1e-7,
            resume_unfreeze_from: 0,
            validation_split: 0.2,
            augment: true,
            seed: 42,
            hidden_units: 128,
            dropout: 0.3,
            backbone_filters: vec![16, 32, 64, 128, 256],
            pretrained_backbone: None,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        check_input_size(self.backbone_filters.len(), self.image_size)?;
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0");
        }
        if self.learning_rate <= 0.0 || self.fine_tune_lr <= 0.0 {
            return fail("learning rates must be positive");
        }
        if self.min_lr < 0.0 {
            return fail("min_lr must not be negative");
        }
        if !(self.plateau_factor > 0.0 && self.plateau_factor < 1.0) {
            return fail("plateau_factor must be in range (0.0, 1.0)");
        }
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return fail("validation_split must be in range (0.0, 1.0)");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail("dropout must be in range [0.0, 1.0)");
        }
        if self.hidden_units == 0 {
            return fail("hidden_units must be greater than 0");
        }
        if self.backbone_filters.iter().any(|&f| f == 0) {
            return fail("backbone_filters entries must be greater than 0");
        }
        if self.model_path.as_os_str().is_empty() {
            return fail("model_path must not be empty");
        }

        Ok(())
    }

    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Epochs of the warm-up phase (head only)
    pub fn warmup_epochs(&self) -> usize {
        self.epochs / 2
    }

    /// Epochs of the fine-tuning phase
    pub fn fine_tune_phase_epochs(&self) -> usize {
        self.epochs - self.warmup_epochs()
    }
}
