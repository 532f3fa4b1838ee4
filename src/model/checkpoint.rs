//! Checkpoint store
//!
//! A checkpoint is addressed by a path stem `P`:
//! - `P.mpk`: weights written by burn's `CompactRecorder`
//! - `P.json`: a [`CheckpointManifest`] describing the architecture
//!
//! Loading always goes manifest -> build -> load weights, so a checkpoint can be
//! restored without knowing its class count up front.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::cnn::{FeatureExtractor, PlantClassifier, PlantClassifierConfig};
use crate::utils::error::{Error, Result};

/// Current manifest format
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Architecture description stored next to the weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub format_version: u32,
    pub model: PlantClassifierConfig,
    pub saved_at: String,
}

impl CheckpointManifest {
    pub fn new(model: PlantClassifierConfig) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            model,
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&json)?;

        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(Error::Model(format!(
                "Unsupported checkpoint format version {} in {:?} (expected {})",
                manifest.format_version, path, MANIFEST_FORMAT_VERSION
            )));
        }
        manifest
            .model
            .check_input_size(manifest.model.input_size)
            .map_err(|e| Error::Model(format!("Invalid checkpoint manifest {:?}: {}", path, e)))?;
        Ok(manifest)
    }
}

/// Weights file for a checkpoint stem
pub fn weights_path(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

/// Manifest file for a checkpoint stem
pub fn manifest_path(stem: &Path) -> PathBuf {
    stem.with_extension("json")
}

/// A checkpoint exists only when both its weights and manifest exist
pub fn checkpoint_exists(stem: &Path) -> bool {
    weights_path(stem).is_file() && manifest_path(stem).is_file()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Save (overwrite) a checkpoint at `stem`
pub fn save_checkpoint<B: Backend>(
    model: &PlantClassifier<B>,
    config: &PlantClassifierConfig,
    stem: &Path,
) -> Result<()> {
    ensure_parent(stem)?;

    model
        .clone()
        .save_file(stem.to_path_buf(), &CompactRecorder::new())?;
    CheckpointManifest::new(config.clone()).save(&manifest_path(stem))?;

    debug!("Checkpoint saved to {:?}", stem);
    Ok(())
}

/// Load a checkpoint in full
pub fn load_checkpoint<B: Backend>(
    stem: &Path,
    device: &B::Device,
) -> Result<(PlantClassifier<B>, PlantClassifierConfig)> {
    if !checkpoint_exists(stem) {
        return Err(Error::CheckpointMissing(stem.to_path_buf()));
    }

    let manifest = CheckpointManifest::load(&manifest_path(stem))?;
    let model = PlantClassifier::<B>::new(&manifest.model, device).load_file(
        stem.to_path_buf(),
        &CompactRecorder::new(),
        device,
    )?;

    info!(
        "Loaded checkpoint {:?} ({} classes, saved {})",
        stem, manifest.model.num_classes, manifest.saved_at
    );
    Ok((model, manifest.model))
}

/// Load feature-extractor weights saved by `export_backbone`
pub fn load_backbone<B: Backend>(
    path: &Path,
    in_channels: usize,
    filters: &[usize],
    device: &B::Device,
) -> Result<FeatureExtractor<B>> {
    let file = weights_path(path);
    if !file.is_file() {
        return Err(Error::PathNotFound(file));
    }

    let backbone = FeatureExtractor::<B>::new(in_channels, filters, device).load_file(
        path.to_path_buf(),
        &CompactRecorder::new(),
        device,
    )?;
    Ok(backbone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray;

    fn small_config(num_classes: usize) -> PlantClassifierConfig {
        PlantClassifierConfig::new(num_classes)
            .with_input_size(8)
            .with_backbone_filters(vec![4])
            .with_hidden_units(4)
    }

    #[test]
    fn test_paths_share_stem() {
        let stem = Path::new("models/plant_disease_model");
        assert_eq!(weights_path(stem), PathBuf::from("models/plant_disease_model.mpk"));
        assert_eq!(manifest_path(stem), PathBuf::from("models/plant_disease_model.json"));
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("model");
        assert!(!checkpoint_exists(&stem));

        let device = Default::default();
        let result = load_checkpoint::<TestBackend>(&stem, &device);
        assert!(matches!(result, Err(Error::CheckpointMissing(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("nested").join("model");
        let device = Default::default();

        let config = small_config(3);
        let model = config.init::<TestBackend>(&device);
        save_checkpoint(&model, &config, &stem).unwrap();
        assert!(checkpoint_exists(&stem));

        let (loaded, loaded_config) = load_checkpoint::<TestBackend>(&stem, &device).unwrap();
        assert_eq!(loaded_config.num_classes, 3);
        assert_eq!(loaded.num_classes(), 3);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);
        let expected = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
        // CompactRecorder stores half precision
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_unsupported_manifest_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let mut manifest = CheckpointManifest::new(small_config(2));
        manifest.format_version = 99;
        manifest.save(&path).unwrap();

        assert!(matches!(CheckpointManifest::load(&path), Err(Error::Model(_))));
    }

    #[test]
    fn test_manifest_input_too_small_for_backbone() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("model");
        let device = Default::default();

        // Two pooling blocks cannot take a 2px input
        let config = small_config(2).with_backbone_filters(vec![4, 4]);
        save_checkpoint(&config.init::<TestBackend>(&device), &config, &stem).unwrap();

        let mut manifest = CheckpointManifest::load(&manifest_path(&stem)).unwrap();
        manifest.model.input_size = 2;
        manifest.save(&manifest_path(&stem)).unwrap();

        assert!(matches!(
            CheckpointManifest::load(&manifest_path(&stem)),
            Err(Error::Model(_))
        ));
        assert!(load_checkpoint::<TestBackend>(&stem, &device).is_err());
    }
}
