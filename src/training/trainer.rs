//! Single training phase
//!
//! Runs the manual Burn training loop for one phase: shuffled mini-batches,
//! cross-entropy, Adam, and a validation pass per epoch feeding the
//! early-stopping / plateau / checkpoint callbacks. Frozen parameters are
//! handled by only handing the optimizer the gradients of trainable
//! sub-modules.

use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Tensor},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::dataset::burn_dataset::{LeafBatch, LeafBatcher, LeafImageDataset, LeafItem};
use crate::model::checkpoint::save_checkpoint;
use crate::model::cnn::{PlantClassifier, PlantClassifierConfig, Trainability};
use crate::training::callbacks::{BestCheckpoint, EarlyStopping, ReduceLrOnPlateau, StopDecision};
use crate::training::history::{EpochMetrics, TrainingHistory};
use crate::utils::error::{Error, Result};
use crate::utils::logging::EpochLogger;
use crate::utils::metrics::RunningAverage;

/// Settings for one training phase
#[derive(Debug, Clone)]
pub struct PhaseSettings {
    pub name: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub patience: usize,
    pub plateau_factor: f64,
    pub plateau_patience: usize,
    pub min_lr: f64,
    pub seed: u64,
    pub trainability: Trainability,
    /// Checkpoint stem written on every `val_loss` improvement
    pub checkpoint: Option<PathBuf>,
}

/// Result of a training phase
pub struct PhaseOutcome<B: AutodiffBackend> {
    pub model: PlantClassifier<B>,
    pub history: TrainingHistory,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub best_val_loss: Option<f64>,
}

/// Loss and accuracy over a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossAccuracy {
    pub loss: f64,
    pub accuracy: f64,
}

/// Apply one optimizer step per trainable sub-module
fn step_trainable<B, O>(
    mut model: PlantClassifier<B>,
    optimizer: &mut O,
    grads: &mut B::Gradients,
    lr: f64,
    trainability: &Trainability,
) -> PlantClassifier<B>
where
    B: AutodiffBackend,
    O: Optimizer<PlantClassifier<B>, B>,
{
    if let Some(from) = trainability.backbone_from {
        for index in from..model.backbone.blocks.len() {
            let block_grads = GradientsParams::from_module(grads, &model.backbone.blocks[index]);
            model = optimizer.step(lr, model, block_grads);
        }
    }
    if trainability.head {
        let head_grads = GradientsParams::from_module(grads, &model.head);
        model = optimizer.step(lr, model, head_grads);
    }
    model
}

fn count_correct<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, burn::tensor::Int>,
) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

fn collect_items(
    dataset: &LeafImageDataset,
    indices: &[usize],
    mut rng: Option<&mut ChaCha8Rng>,
) -> Vec<LeafItem> {
    let mut items = Vec::with_capacity(indices.len());
    for &index in indices {
        match dataset.load_item(index, rng.as_deref_mut()) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable image: {}", e),
        }
    }
    items
}

/// Mean cross-entropy and accuracy of `model` over `dataset`, without augmentation
pub fn evaluate_loss<B: Backend>(
    model: &PlantClassifier<B>,
    dataset: &LeafImageDataset,
    batch_size: usize,
    device: &B::Device,
) -> LossAccuracy {
    let batcher = LeafBatcher::new(dataset.image_size());
    let indices: Vec<usize> = (0..dataset.samples().len()).collect();

    let mut loss = RunningAverage::new();
    let mut correct = 0usize;

    for chunk in indices.chunks(batch_size.max(1)) {
        let items = collect_items(dataset, chunk, None);
        if items.is_empty() {
            continue;
        }
        let n = items.len();
        let batch: LeafBatch<B> = batcher.batch(items, device);

        let logits = model.forward(batch.images);
        let batch_loss = CrossEntropyLossConfig::new()
            .init(device)
            .forward(logits.clone(), batch.targets.clone());

        loss.add(batch_loss.into_scalar().elem::<f64>(), n);
        correct += count_correct(logits, batch.targets);
    }

    let total = loss.count();
    LossAccuracy {
        loss: loss.average(),
        accuracy: if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        },
    }
}

/// Run one phase of training
pub fn run_phase<B: AutodiffBackend>(
    mut model: PlantClassifier<B>,
    model_config: &PlantClassifierConfig,
    train: &LeafImageDataset,
    valid: &LeafImageDataset,
    settings: &PhaseSettings,
    device: &B::Device,
) -> Result<PhaseOutcome<B>> {
    if train.samples().is_empty() {
        return Err(Error::Dataset("Training split is empty".to_string()));
    }
    if valid.samples().is_empty() {
        return Err(Error::Dataset("Validation split is empty".to_string()));
    }

    let mut history = TrainingHistory::new();
    if settings.epochs == 0 {
        info!("[{}] 0 epochs requested; skipping", settings.name);
        return Ok(PhaseOutcome {
            model,
            history,
            epochs_run: 0,
            stopped_early: false,
            best_val_loss: None,
        });
    }

    info!(
        "[{}] {} epochs, lr {:.2e}, {} train / {} val images, trainable: head={} backbone_from={:?}",
        settings.name,
        settings.epochs,
        settings.learning_rate,
        train.samples().len(),
        valid.samples().len(),
        settings.trainability.head,
        settings.trainability.backbone_from
    );

    let mut optimizer = AdamConfig::new().init::<B, PlantClassifier<B>>();
    let batcher = LeafBatcher::new(train.image_size());
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);

    let mut early_stopping = EarlyStopping::new(settings.patience);
    let mut plateau = ReduceLrOnPlateau::new(
        settings.plateau_factor,
        settings.plateau_patience,
        settings.min_lr,
    );
    let mut best_checkpoint = BestCheckpoint::new();
    let mut best_model: Option<PlantClassifier<B>> = None;

    let mut logger = EpochLogger::new(&settings.name, settings.epochs);
    let mut lr = settings.learning_rate;
    let mut epochs_run = 0;
    let mut stopped_early = false;

    for epoch in 0..settings.epochs {
        logger.start_epoch(epoch);

        let mut indices: Vec<usize> = (0..train.samples().len()).collect();
        indices.shuffle(&mut rng);

        let mut train_loss = RunningAverage::new();
        let mut correct = 0usize;

        for chunk in indices.chunks(settings.batch_size.max(1)) {
            let items = collect_items(train, chunk, Some(&mut rng));
            if items.is_empty() {
                continue;
            }
            let n = items.len();
            let batch: LeafBatch<B> = batcher.batch(items, device);

            let logits = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(device)
                .forward(logits.clone(), batch.targets.clone());

            train_loss.add(loss.clone().into_scalar().elem::<f64>(), n);
            correct += count_correct(logits, batch.targets);

            let mut grads = loss.backward();
            model = step_trainable(model, &mut optimizer, &mut grads, lr, &settings.trainability);
        }

        if train_loss.count() == 0 {
            return Err(Error::Training(
                "No readable training images in this epoch".to_string(),
            ));
        }

        let val = evaluate_loss(&model.valid(), valid, settings.batch_size, device);
        let metrics = EpochMetrics {
            loss: train_loss.average(),
            accuracy: correct as f64 / train_loss.count() as f64,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            learning_rate: lr,
        };
        history.record(&metrics);
        logger.end_epoch(
            metrics.loss,
            metrics.accuracy,
            metrics.val_loss,
            metrics.val_accuracy,
            lr,
        );
        epochs_run += 1;

        let decision = early_stopping.update(val.loss);
        if decision == StopDecision::Improved {
            best_model = Some(model.clone());
        }

        lr = plateau.update(val.loss, lr);

        if best_checkpoint.should_save(val.loss) {
            if let Some(stem) = &settings.checkpoint {
                save_checkpoint(&model, model_config, stem)?;
                info!("[{}] val_loss improved to {:.4}; checkpoint saved", settings.name, val.loss);
            }
        }

        if decision == StopDecision::Stop {
            if let Some(best) = best_model.take() {
                info!("[{}] restoring best weights", settings.name);
                model = best;
            }
            stopped_early = true;
            break;
        }
    }

    logger.finish(epochs_run);

    Ok(PhaseOutcome {
        model,
        history,
        epochs_run,
        stopped_early,
        best_val_loss: early_stopping.best(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::loader::test_support::{write_class_tree, write_png};
    use crate::dataset::loader::{scan_labelled, split_per_class, ImageSample};
    use crate::training::history::VAL_LOSS;
    use crate::dataset::LabelRegistry;
    use burn::backend::{Autodiff, NdArray};
    use std::path::Path;

    type TestBackend = Autodiff<NdArray>;

    pub(crate) fn tiny_config(num_classes: usize) -> PlantClassifierConfig {
        PlantClassifierConfig::new(num_classes)
            .with_input_size(8)
            .with_backbone_filters(vec![4, 4])
            .with_hidden_units(8)
    }

    fn datasets(root: &Path) -> (LeafImageDataset, LeafImageDataset) {
        write_class_tree(root, &[("green", [0, 200, 0]), ("red", [200, 0, 0])], 5, 8);
        let registry = LabelRegistry::discover(root).unwrap();
        let samples = scan_labelled(root, &registry).unwrap();
        let (train, valid) = split_per_class(samples, 0.2);
        (LeafImageDataset::new(train, 8), LeafImageDataset::new(valid, 8))
    }

    fn settings(epochs: usize, trainability: Trainability) -> PhaseSettings {
        PhaseSettings {
            name: "test".to_string(),
            epochs,
            learning_rate: 1e-2,
            batch_size: 4,
            patience: 5,
            plateau_factor: 0.2,
            plateau_patience: 3,
            min_lr: 1e-7,
            seed: 42,
            trainability,
            checkpoint: None,
        }
    }

    fn conv_weights(model: &PlantClassifier<TestBackend>) -> Vec<Vec<f32>> {
        model
            .backbone
            .blocks
            .iter()
            .map(|b| b.conv.weight.val().into_data().to_vec::<f32>().unwrap())
            .collect()
    }

    fn head_weights(model: &PlantClassifier<TestBackend>) -> Vec<f32> {
        model.head.predictions.weight.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_head_only_phase_keeps_backbone_frozen() {
        let dir = tempfile::tempdir().unwrap();
        let (train, valid) = datasets(dir.path());
        let device = Default::default();
        let config = tiny_config(2);
        let model = config.init::<TestBackend>(&device);

        let backbone_before = conv_weights(&model);
        let head_before = head_weights(&model);

        let outcome = run_phase(
            model,
            &config,
            &train,
            &valid,
            &settings(2, Trainability::head_only()),
            &device,
        )
        .unwrap();

        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.history.epochs(), 2);
        assert_eq!(conv_weights(&outcome.model), backbone_before);
        assert_ne!(head_weights(&outcome.model), head_before);
    }

    #[test]
    fn test_unfrozen_blocks_are_updated() {
        let dir = tempfile::tempdir().unwrap();
        let (train, valid) = datasets(dir.path());
        let device = Default::default();
        let config = tiny_config(2);
        let model = config.init::<TestBackend>(&device);
        let before = conv_weights(&model);

        let trainability = Trainability {
            head: true,
            backbone_from: Some(1),
        };
        let outcome =
            run_phase(model, &config, &train, &valid, &settings(1, trainability), &device).unwrap();

        let after = conv_weights(&outcome.model);
        assert_eq!(after[0], before[0]);
        assert_ne!(after[1], before[1]);
    }

    #[test]
    fn test_checkpoint_written_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let (train, valid) = datasets(&dir.path().join("data"));
        let device = Default::default();
        let config = tiny_config(2);
        let stem = dir.path().join("models").join("model");

        let mut phase = settings(1, Trainability::head_only());
        phase.checkpoint = Some(stem.clone());

        run_phase(config.init::<TestBackend>(&device), &config, &train, &valid, &phase, &device)
            .unwrap();
        assert!(crate::model::checkpoint_exists(&stem));
    }

    #[test]
    fn test_empty_validation_split_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (train, _) = datasets(dir.path());
        let device = Default::default();
        let config = tiny_config(2);

        let result = run_phase(
            config.init::<TestBackend>(&device),
            &config,
            &train,
            &LeafImageDataset::new(Vec::new(), 8),
            &settings(1, Trainability::head_only()),
            &device,
        );
        assert!(matches!(result, Err(Error::Dataset(_))));
    }

    /// Backbone-less model: the head sees the mean colour directly
    fn linear_config() -> PlantClassifierConfig {
        PlantClassifierConfig::new(2)
            .with_input_size(8)
            .with_backbone_filters(vec![])
            .with_hidden_units(8)
            .with_dropout(0.0)
    }

    fn colour_samples(root: &Path, green_label: usize, red_label: usize) -> Vec<ImageSample> {
        let mut samples = Vec::new();
        for i in 0..4 {
            for (name, colour, label) in [
                ("green", [0, 200, 0], green_label),
                ("red", [200, 0, 0], red_label),
            ] {
                let path = root.join(format!("{}_{}.png", name, i));
                write_png(&path, 8, colour);
                samples.push(ImageSample {
                    path,
                    label,
                    class_name: name.to_string(),
                });
            }
        }
        samples
    }

    #[test]
    fn test_early_stop_when_val_loss_stalls() {
        let dir = tempfile::tempdir().unwrap();
        let (train, valid) = datasets(dir.path());
        let device = Default::default();
        let config = linear_config();
        let model = config.init::<TestBackend>(&device);
        let head_before = head_weights(&model);

        // Nothing trains, so every epoch reports the same val_loss
        let frozen = Trainability {
            head: false,
            backbone_from: None,
        };
        let mut phase = settings(5, frozen);
        phase.patience = 1;

        let outcome = run_phase(model, &config, &train, &valid, &phase, &device).unwrap();

        assert!(outcome.stopped_early);
        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.history.epochs(), 2);
        let val_loss = outcome.history.get(VAL_LOSS).unwrap();
        assert_eq!(val_loss[0], val_loss[1]);
        assert_eq!(outcome.best_val_loss, Some(val_loss[0]));
        assert_eq!(head_weights(&outcome.model), head_before);
    }

    #[test]
    fn test_early_stop_restores_best_weights() {
        let dir = tempfile::tempdir().unwrap();
        let train = LeafImageDataset::new(colour_samples(&dir.path().join("train"), 0, 1), 8);
        // Validation labels are swapped, so learning the training split raises val_loss
        let valid = LeafImageDataset::new(colour_samples(&dir.path().join("valid"), 1, 0), 8);
        let device = Default::default();
        let config = linear_config();

        let mut phase = settings(10, Trainability::head_only());
        phase.patience = 1;
        phase.learning_rate = 5e-2;

        let outcome = run_phase(
            config.init::<TestBackend>(&device),
            &config,
            &train,
            &valid,
            &phase,
            &device,
        )
        .unwrap();

        assert!(outcome.stopped_early);
        assert_eq!(outcome.epochs_run, 2);
        let val_loss = outcome.history.get(VAL_LOSS).unwrap();
        assert!(val_loss[1] > val_loss[0]);
        assert_eq!(outcome.best_val_loss, Some(val_loss[0]));

        // The returned weights are the epoch-1 snapshot, not the last epoch's
        let restored = evaluate_loss(&outcome.model.valid(), &valid, phase.batch_size, &device);
        assert!((restored.loss - val_loss[0]).abs() < 1e-6);
        assert!((restored.loss - val_loss[1]).abs() > 1e-6);
    }

    #[test]
    fn test_evaluate_loss_on_inner_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (_, valid) = datasets(dir.path());
        let device = Default::default();
        let model = tiny_config(2).init::<NdArray>(&device);

        let result = evaluate_loss(&model, &valid, 3, &device);
        assert!(result.loss.is_finite());
        assert!((0.0..=1.0).contains(&result.accuracy));
    }
}
