//! Checkpoint export
//!
//! Re-encodes a checkpoint's weights with one of burn's full-precision file
//! recorders and copies the manifest alongside, or extracts the feature
//! extractor alone so it can be used as `pretrained_backbone`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::{
    module::Module,
    record::{
        BinFileRecorder, CompactRecorder, FullPrecisionSettings, NamedMpkFileRecorder,
        PrettyJsonFileRecorder,
    },
    tensor::backend::Backend,
};
use tracing::info;

use crate::model::checkpoint::{load_checkpoint, CheckpointManifest};
use crate::utils::error::{Error, Result};

/// Output encoding for exported weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Full-precision named MessagePack (`.mpk`)
    Full,
    /// Pretty-printed JSON (`.json`)
    Json,
    /// Bincode (`.bin`)
    Bin,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Full => "mpk",
            ExportFormat::Json => "json",
            ExportFormat::Bin => "bin",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" | "mpk" => Ok(ExportFormat::Full),
            "json" => Ok(ExportFormat::Json),
            "bin" | "bincode" => Ok(ExportFormat::Bin),
            other => Err(Error::Config(format!(
                "Unknown export format '{}' (expected full, json or bin)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Full => "full",
            ExportFormat::Json => "json",
            ExportFormat::Bin => "bin",
        };
        write!(f, "{}", name)
    }
}

fn output_stem(model_path: &Path, out_dir: &Path, suffix: &str) -> PathBuf {
    let name = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "model".to_string());
    out_dir.join(format!("{}{}", name, suffix))
}

/// Export a checkpoint's weights in `format`; returns the written weights file.
///
/// The manifest is copied to `<out>.manifest.json` so the weights can be
/// rebuilt without the source checkpoint.
pub fn export_checkpoint<B: Backend>(
    model_path: &Path,
    out_dir: &Path,
    format: ExportFormat,
    device: &B::Device,
) -> Result<PathBuf> {
    let (model, config) = load_checkpoint::<B>(model_path, device)?;
    fs::create_dir_all(out_dir)?;

    let stem = output_stem(model_path, out_dir, "");
    match format {
        ExportFormat::Full => model.save_file(
            stem.clone(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )?,
        ExportFormat::Json => model.save_file(
            stem.clone(),
            &PrettyJsonFileRecorder::<FullPrecisionSettings>::new(),
        )?,
        ExportFormat::Bin => {
            model.save_file(stem.clone(), &BinFileRecorder::<FullPrecisionSettings>::new())?
        }
    }

    let manifest_out = output_stem(model_path, out_dir, ".manifest.json");
    CheckpointManifest::new(config).save(&manifest_out)?;

    let written = stem.with_extension(format.extension());
    info!("Exported {:?} as {} to {:?}", model_path, format, written);
    Ok(written)
}

/// Export only the feature-extractor weights; returns the written stem.
///
/// The result loads with `checkpoint::load_backbone` and is what the
/// `pretrained_backbone` setting expects.
pub fn export_backbone<B: Backend>(
    model_path: &Path,
    out_dir: &Path,
    device: &B::Device,
) -> Result<PathBuf> {
    let (model, _) = load_checkpoint::<B>(model_path, device)?;
    fs::create_dir_all(out_dir)?;

    let stem = output_stem(model_path, out_dir, "_backbone");
    model
        .backbone
        .save_file(stem.clone(), &CompactRecorder::new())?;

    info!("Exported feature extractor of {:?} to {:?}", model_path, stem);
    Ok(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::checkpoint::{load_backbone, save_checkpoint};
    use crate::model::cnn::PlantClassifierConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn saved_checkpoint(dir: &Path) -> (PathBuf, PlantClassifierConfig) {
        let device = Default::default();
        let config = PlantClassifierConfig::new(3)
            .with_input_size(8)
            .with_backbone_filters(vec![4, 4])
            .with_hidden_units(4);
        let model = config.init::<TestBackend>(&device);
        let stem = dir.join("plant_disease_model");
        save_checkpoint(&model, &config, &stem).unwrap();
        (stem, config)
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("full".parse::<ExportFormat>().unwrap(), ExportFormat::Full);
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("bincode".parse::<ExportFormat>().unwrap(), ExportFormat::Bin);
        assert!("onnx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_export_formats_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let (stem, _) = saved_checkpoint(dir.path());
        let out = dir.path().join("export");
        let device = Default::default();

        for format in [ExportFormat::Full, ExportFormat::Json, ExportFormat::Bin] {
            let written = export_checkpoint::<TestBackend>(&stem, &out, format, &device).unwrap();
            assert!(written.is_file(), "{:?} missing", written);
        }
        assert!(out.join("plant_disease_model.manifest.json").is_file());
    }

    #[test]
    fn test_exported_backbone_loads() {
        let dir = tempfile::tempdir().unwrap();
        let (stem, config) = saved_checkpoint(dir.path());
        let device = Default::default();

        let backbone_stem =
            export_backbone::<TestBackend>(&stem, &dir.path().join("export"), &device).unwrap();
        let backbone = load_backbone::<TestBackend>(
            &backbone_stem,
            config.in_channels,
            &config.backbone_filters,
            &device,
        )
        .unwrap();
        assert_eq!(backbone.num_blocks(), 2);
    }

    #[test]
    fn test_export_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let result = export_checkpoint::<TestBackend>(
            &dir.path().join("absent"),
            dir.path(),
            ExportFormat::Full,
            &device,
        );
        assert!(matches!(result, Err(Error::CheckpointMissing(_))));
    }
}
