//! Model Lifecycle Manager
//!
//! Owns the decision of which model to train (fresh, reused or adapted to a
//! new class count), the two-phase schedule (head warm-up, then partial
//! fine-tuning), resumption from a saved checkpoint, and persistence of the
//! label registry, checkpoint and history.

use std::fmt;
use std::path::PathBuf;

use burn::tensor::backend::{AutodiffBackend, Backend};
use tracing::{info, warn};

use crate::backend::{default_device, TrainingBackend};
use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::burn_dataset::LeafImageDataset;
use crate::dataset::labels::LabelRegistry;
use crate::dataset::loader::{scan_labelled, split_per_class};
use crate::model::checkpoint::{checkpoint_exists, load_backbone, load_checkpoint, save_checkpoint};
use crate::model::cnn::{unfreeze_from, PlantClassifier, PlantClassifierConfig, Trainability};
use crate::model::config::PipelineConfig;
use crate::training::history::{TrainingHistory, VAL_ACCURACY, VAL_LOSS};
use crate::training::trainer::{run_phase, PhaseSettings};
use crate::utils::error::{Error, Result};

/// Where the trained model came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    /// Newly built; `pretrained` when the backbone was loaded from disk
    Fresh { pretrained: bool },
    /// Existing checkpoint with a matching class count
    Reused,
    /// Existing checkpoint whose head was replaced for a new class count
    Adapted { from: usize, to: usize },
    /// Continued by `resume`
    Resumed,
}

impl ModelOrigin {
    /// Fresh models start a new history; everything else appends
    pub fn appends_history(&self) -> bool {
        !matches!(self, ModelOrigin::Fresh { .. })
    }
}

impl fmt::Display for ModelOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelOrigin::Fresh { pretrained: true } => write!(f, "new model (pretrained backbone)"),
            ModelOrigin::Fresh { pretrained: false } => write!(f, "new model"),
            ModelOrigin::Reused => write!(f, "existing model"),
            ModelOrigin::Adapted { from, to } => {
                write!(f, "existing model adapted from {} to {} classes", from, to)
            }
            ModelOrigin::Resumed => write!(f, "resumed model"),
        }
    }
}

/// Summary of a `train` or `resume` run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub origin: ModelOrigin,
    pub class_names: Vec<String>,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// Epochs run in this session, per phase
    pub phase_epochs: Vec<(String, usize)>,
    pub stopped_early: bool,
    pub best_val_loss: Option<f64>,
    pub final_val_accuracy: Option<f64>,
    /// Epochs in the persisted history after this session
    pub history_epochs: usize,
    pub model_path: PathBuf,
}

impl TrainingReport {
    pub fn epochs_run(&self) -> usize {
        self.phase_epochs.iter().map(|(_, n)| n).sum()
    }
}

/// A model ready for training together with its architecture
pub struct PreparedModel<B: Backend> {
    pub model: PlantClassifier<B>,
    pub config: PlantClassifierConfig,
    pub origin: ModelOrigin,
}

/// Drives training runs for one [`PipelineConfig`]
pub struct ModelLifecycle<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ModelLifecycle<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Train on the default backend
    pub fn train(&self) -> Result<TrainingReport> {
        self.train_on::<TrainingBackend>(&default_device())
    }

    /// Resume on the default backend
    pub fn resume(&self) -> Result<TrainingReport> {
        self.resume_on::<TrainingBackend>(&default_device())
    }

    fn fresh_config(&self, num_classes: usize) -> PlantClassifierConfig {
        PlantClassifierConfig::new(num_classes)
            .with_input_size(self.config.image_size)
            .with_backbone_filters(self.config.backbone_filters.clone())
            .with_hidden_units(self.config.hidden_units)
            .with_dropout(self.config.dropout)
    }

    /// Load, adapt or build the model for `registry`
    pub fn prepare_model<B: Backend>(
        &self,
        registry: &LabelRegistry,
        device: &B::Device,
    ) -> Result<PreparedModel<B>> {
        let num_classes = registry.len();

        if checkpoint_exists(&self.config.model_path) {
            info!("Loading existing model from {:?}", self.config.model_path);
            let (model, config) = load_checkpoint::<B>(&self.config.model_path, device)?;
            let old_classes = model.num_classes();

            if old_classes == num_classes {
                info!("Class count unchanged ({}); reusing model", num_classes);
                return Ok(PreparedModel {
                    model,
                    config,
                    origin: ModelOrigin::Reused,
                });
            }

            warn!(
                "Class count changed ({} -> {}); replacing the classification head",
                old_classes, num_classes
            );
            let config = PlantClassifierConfig {
                num_classes,
                hidden_units: self.config.hidden_units,
                dropout: self.config.dropout,
                ..config
            };
            return Ok(PreparedModel {
                model: model.adapt(&config, device),
                config,
                origin: ModelOrigin::Adapted {
                    from: old_classes,
                    to: num_classes,
                },
            });
        }

        let config = self.fresh_config(num_classes);
        let (model, pretrained) = match &self.config.pretrained_backbone {
            Some(path) => {
                info!("Building new model on pretrained backbone {:?}", path);
                let backbone =
                    load_backbone::<B>(path, config.in_channels, &config.backbone_filters, device)?;
                (PlantClassifier::with_backbone(backbone, &config, device), true)
            }
            None => {
                warn!("No pretrained backbone configured; feature extractor starts from random weights");
                (PlantClassifier::new(&config, device), false)
            }
        };

        Ok(PreparedModel {
            model,
            config,
            origin: ModelOrigin::Fresh { pretrained },
        })
    }

    /// Training and validation datasets for `registry` at `image_size`
    fn load_splits(
        &self,
        registry: &LabelRegistry,
        image_size: usize,
    ) -> Result<(LeafImageDataset, LeafImageDataset)> {
        let samples = scan_labelled(&self.config.train_dir, registry)?;
        let (train, valid) = split_per_class(samples, self.config.validation_split);

        if train.is_empty() {
            return Err(Error::Dataset(format!(
                "No training images found under {:?}",
                self.config.train_dir
            )));
        }
        if valid.is_empty() {
            return Err(Error::Dataset(format!(
                "Validation split is empty (validation_split = {}); add more images per class",
                self.config.validation_split
            )));
        }
        info!("{} training / {} validation images", train.len(), valid.len());

        let mut train = LeafImageDataset::new(train, image_size);
        if self.config.augment {
            train = train.with_augmenter(Augmenter::new(AugmentationConfig::default()));
        }
        Ok((train, LeafImageDataset::new(valid, image_size)))
    }

    fn phase(
        &self,
        name: &str,
        epochs: usize,
        learning_rate: f64,
        seed: u64,
        trainability: Trainability,
    ) -> PhaseSettings {
        PhaseSettings {
            name: name.to_string(),
            epochs,
            learning_rate,
            batch_size: self.config.batch_size,
            patience: self.config.patience,
            plateau_factor: self.config.plateau_factor,
            plateau_patience: self.config.plateau_patience,
            min_lr: self.config.min_lr,
            seed,
            trainability,
            checkpoint: Some(self.config.model_path.clone()),
        }
    }

    /// Persist the final checkpoint and the (possibly appended) history
    fn finish<B: AutodiffBackend>(
        &self,
        model: &PlantClassifier<B>,
        model_config: &PlantClassifierConfig,
        session: &TrainingHistory,
        append: bool,
    ) -> Result<TrainingHistory> {
        save_checkpoint(model, model_config, &self.config.model_path)?;

        let mut history = if append {
            TrainingHistory::load_or_default(&self.config.history_path)?
        } else {
            TrainingHistory::new()
        };
        history.extend(session);
        history.save(&self.config.history_path)?;

        info!(
            "Model saved to {:?}; history ({} epochs) saved to {:?}",
            self.config.model_path,
            history.epochs(),
            self.config.history_path
        );
        Ok(history)
    }

    /// Two-phase training run on backend `B`
    pub fn train_on<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainingReport> {
        self.config.validate()?;

        let registry = LabelRegistry::discover(&self.config.train_dir)?;
        registry.save(&self.config.label_path)?;
        info!(
            "Found {} classes; labels saved to {:?}",
            registry.len(),
            self.config.label_path
        );

        let PreparedModel {
            model,
            config: model_config,
            origin,
        } = self.prepare_model::<B>(&registry, device)?;
        if model_config.input_size != self.config.image_size {
            warn!(
                "Model was built for {}px input; using that instead of image_size={}",
                model_config.input_size, self.config.image_size
            );
        }

        let (train, valid) = self.load_splits(&registry, model_config.input_size)?;

        let warmup = self.phase(
            "warm-up",
            self.config.warmup_epochs(),
            self.config.learning_rate,
            self.config.seed,
            Trainability::head_only(),
        );
        let phase1 = run_phase(model, &model_config, &train, &valid, &warmup, device)?;

        let trainability = unfreeze_from(&phase1.model.layer_roles(), self.config.fine_tune_at)?;
        let fine_tune = self.phase(
            "fine-tune",
            self.config.fine_tune_phase_epochs(),
            self.config.learning_rate / 10.0,
            self.config.seed.wrapping_add(1),
            trainability,
        );
        let phase2 = run_phase(phase1.model, &model_config, &train, &valid, &fine_tune, device)?;

        let mut session = phase1.history.clone();
        session.extend(&phase2.history);

        let history = self.finish(
            &phase2.model,
            &model_config,
            &session,
            origin.appends_history(),
        )?;

        Ok(TrainingReport {
            origin,
            class_names: registry.names().to_vec(),
            train_samples: train.samples().len(),
            validation_samples: valid.samples().len(),
            phase_epochs: vec![
                (warmup.name, phase1.epochs_run),
                (fine_tune.name, phase2.epochs_run),
            ],
            stopped_early: phase1.stopped_early || phase2.stopped_early,
            best_val_loss: session.best_min(VAL_LOSS).map(|(_, v)| v),
            final_val_accuracy: session
                .get(VAL_ACCURACY)
                .and_then(|v| v.last().copied()),
            history_epochs: history.epochs(),
            model_path: self.config.model_path.clone(),
        })
    }

    /// Continue fine-tuning a saved checkpoint on backend `B`
    pub fn resume_on<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainingReport> {
        if !checkpoint_exists(&self.config.model_path) {
            return Err(Error::CheckpointMissing(self.config.model_path.clone()));
        }
        self.config.validate()?;

        let (model, model_config) = load_checkpoint::<B>(&self.config.model_path, device)?;

        let registry = if self.config.label_path.is_file() {
            LabelRegistry::load(&self.config.label_path)?
        } else {
            LabelRegistry::discover(&self.config.train_dir)?
        };
        if registry.len() != model.num_classes() {
            return Err(Error::Model(format!(
                "Model outputs {} classes but the label registry has {}; run `train`, which adapts the model",
                model.num_classes(),
                registry.len()
            )));
        }

        let (train, valid) = self.load_splits(&registry, model_config.input_size)?;

        let trainability = unfreeze_from(&model.layer_roles(), self.config.resume_unfreeze_from)?;
        let settings = self.phase(
            "resume",
            self.config.fine_tune_epochs,
            self.config.fine_tune_lr,
            self.config.seed.wrapping_add(2),
            trainability,
        );
        let outcome = run_phase(model, &model_config, &train, &valid, &settings, device)?;

        let history = self.finish(&outcome.model, &model_config, &outcome.history, true)?;

        Ok(TrainingReport {
            origin: ModelOrigin::Resumed,
            class_names: registry.names().to_vec(),
            train_samples: train.samples().len(),
            validation_samples: valid.samples().len(),
            phase_epochs: vec![(settings.name, outcome.epochs_run)],
            stopped_early: outcome.stopped_early,
            best_val_loss: outcome.best_val_loss,
            final_val_accuracy: outcome
                .history
                .get(VAL_ACCURACY)
                .and_then(|v| v.last().copied()),
            history_epochs: history.epochs(),
            model_path: self.config.model_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::test_support::write_class_tree;
    use burn::backend::{Autodiff, NdArray};
    use std::path::Path;

    type TestBackend = Autodiff<NdArray>;

    fn test_config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            train_dir: root.join("data").join("train"),
            model_path: root.join("models").join("plant_disease_model"),
            label_path: root.join("models").join("labels.json"),
            history_path: root.join("models").join("history.json"),
            image_size: 8,
            batch_size: 4,
            epochs: 2,
            learning_rate: 1e-3,
            fine_tune_at: 1,
            fine_tune_epochs: 2,
            hidden_units: 8,
            backbone_filters: vec![4, 4],
            ..PipelineConfig::default()
        }
    }

    fn write_classes(config: &PipelineConfig, classes: &[(&str, [u8; 3])]) {
        write_class_tree(&config.train_dir, classes, 5, 8);
    }

    const TWO_CLASSES: [(&str, [u8; 3]); 2] = [("corn_rust", [150, 80, 0]), ("corn_healthy", [0, 180, 0])];

    #[test]
    fn test_resume_without_checkpoint_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(!config.train_dir.exists());

        let device = Default::default();
        let result = ModelLifecycle::new(&config).resume_on::<TestBackend>(&device);
        assert!(matches!(result, Err(Error::CheckpointMissing(_))));
        assert!(!config.label_path.exists());
    }

    #[test]
    fn test_train_fresh_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_classes(&config, &TWO_CLASSES);

        let device = Default::default();
        let report = ModelLifecycle::new(&config).train_on::<TestBackend>(&device).unwrap();

        assert_eq!(report.origin, ModelOrigin::Fresh { pretrained: false });
        assert_eq!(report.class_names, vec!["corn_healthy", "corn_rust"]);
        assert_eq!(report.epochs_run(), 2);
        assert_eq!(report.history_epochs, 2);
        assert!(checkpoint_exists(&config.model_path));

        let labels = LabelRegistry::load(&config.label_path).unwrap();
        assert_eq!(labels.index_of("corn_rust"), Some(1));

        let history = TrainingHistory::load(&config.history_path).unwrap();
        assert_eq!(history.get("val_loss").unwrap().len(), 2);
        assert_eq!(history.get("learning_rate").unwrap().len(), 2);
    }

    #[test]
    fn test_history_accumulates_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_classes(&config, &TWO_CLASSES);
        let device = Default::default();
        let lifecycle = ModelLifecycle::new(&config);

        lifecycle.train_on::<TestBackend>(&device).unwrap();
        let second = lifecycle.train_on::<TestBackend>(&device).unwrap();
        assert_eq!(second.origin, ModelOrigin::Reused);
        assert_eq!(second.history_epochs, 4);

        let resumed = lifecycle.resume_on::<TestBackend>(&device).unwrap();
        assert_eq!(resumed.origin, ModelOrigin::Resumed);
        assert_eq!(resumed.history_epochs, 4 + 2);
    }

    #[test]
    fn test_new_class_adapts_model_and_keeps_backbone() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_classes(&config, &TWO_CLASSES);
        let device = Default::default();
        let lifecycle = ModelLifecycle::new(&config);
        lifecycle.train_on::<TestBackend>(&device).unwrap();

        write_classes(&config, &[("corn_blight", [90, 90, 90])]);
        let registry = LabelRegistry::discover(&config.train_dir).unwrap();

        let (previous, _) = load_checkpoint::<NdArray>(&config.model_path, &device).unwrap();
        let prepared = lifecycle.prepare_model::<NdArray>(&registry, &device).unwrap();

        assert_eq!(prepared.origin, ModelOrigin::Adapted { from: 2, to: 3 });
        assert_eq!(prepared.model.num_classes(), 3);
        assert_eq!(prepared.config.num_classes, 3);
        for (old, new) in previous.backbone.blocks.iter().zip(prepared.model.backbone.blocks.iter()) {
            assert_eq!(
                old.conv.weight.val().into_data().to_vec::<f32>().unwrap(),
                new.conv.weight.val().into_data().to_vec::<f32>().unwrap()
            );
        }

        let report = lifecycle.train_on::<TestBackend>(&device).unwrap();
        assert_eq!(report.origin, ModelOrigin::Adapted { from: 2, to: 3 });
        assert_eq!(report.history_epochs, 4);
    }

    #[test]
    fn test_resume_rejects_registry_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_classes(&config, &TWO_CLASSES);
        let device = Default::default();
        let lifecycle = ModelLifecycle::new(&config);
        lifecycle.train_on::<TestBackend>(&device).unwrap();

        LabelRegistry::new(vec!["a".into(), "b".into(), "c".into()])
            .unwrap()
            .save(&config.label_path)
            .unwrap();

        let result = lifecycle.resume_on::<TestBackend>(&device);
        assert!(matches!(result, Err(Error::Model(_))));
    }

    #[test]
    fn test_too_few_images_for_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_class_tree(&config.train_dir, &TWO_CLASSES, 2, 8);

        let device = Default::default();
        let result = ModelLifecycle::new(&config).train_on::<TestBackend>(&device);
        assert!(matches!(result, Err(Error::Dataset(_))));
        // Registry is persisted before any model work
        assert!(config.label_path.is_file());
    }

    #[test]
    fn test_missing_pretrained_backbone_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.pretrained_backbone = Some(dir.path().join("no_such_backbone"));
        write_classes(&config, &TWO_CLASSES);

        let registry = LabelRegistry::discover(&config.train_dir).unwrap();
        let device = Default::default();
        let result = ModelLifecycle::new(&config).prepare_model::<NdArray>(&registry, &device);
        assert!(matches!(result, Err(Error::PathNotFound(_))));
    }
}
