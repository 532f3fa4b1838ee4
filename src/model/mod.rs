//! Model module: classifier network, configuration, checkpoints and export
//!
//! - `cnn`: feature extractor + classification head built with Burn
//! - `config`: the pipeline configuration record
//! - `checkpoint`: weights + manifest persistence
//! - `export`: deployment formats and backbone extraction

pub mod checkpoint;
pub mod cnn;
pub mod config;
pub mod export;

pub use checkpoint::{checkpoint_exists, load_checkpoint, save_checkpoint, CheckpointManifest};
pub use cnn::{LayerRole, PlantClassifier, PlantClassifierConfig, Trainability};
pub use config::PipelineConfig;
pub use export::{export_backbone, export_checkpoint, ExportFormat};
