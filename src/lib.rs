//! # Plant Disease
//!
//! Leaf-image plant disease classification with the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: dataset organisation, label registry, image loading, batching and augmentation
//! - `model`: classifier network, checkpoints and export
//! - `training`: model lifecycle (train, adapt, fine-tune, resume) and callbacks
//! - `inference`: single-image prediction, directory evaluation and advice lookup
//! - `utils`: errors, logging and metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plant_disease::model::PipelineConfig;
//! use plant_disease::training::ModelLifecycle;
//!
//! let config = PipelineConfig::default();
//! let report = ModelLifecycle::new(&config).train()?;
//! println!("best val_loss: {:?}", report.best_val_loss);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::labels::LabelRegistry;
pub use inference::evaluator::{evaluate, EvaluationReport};
pub use inference::predictor::{Prediction, Predictor};
pub use model::{PipelineConfig, PlantClassifier, PlantClassifierConfig};
pub use training::{ModelLifecycle, TrainingHistory, TrainingReport};
pub use utils::error::{Error, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
