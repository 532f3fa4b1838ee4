//! Evaluation Runner
//!
//! Scores a saved checkpoint on a held-out `test_dir/<class>/*` tree, or lists
//! predictions for an unlabelled directory. Both are read-only.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{default_device, DefaultBackend};
use crate::dataset::loader::{images_recursive, open_image, scan_labelled};
use crate::inference::predictor::{Prediction, Predictor};
use crate::utils::error::{Error, Result};
use crate::utils::metrics::Metrics;

/// Metrics for one evaluation run
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub metrics: Metrics,
    pub class_names: Vec<String>,
    /// Files that could not be decoded
    pub skipped: Vec<PathBuf>,
}

impl EvaluationReport {
    pub fn confusion_matrix_text(&self) -> String {
        self.metrics.confusion_matrix.display(Some(&self.class_names))
    }
}

/// Decode `paths` and predict them in batches; unreadable files are reported, not fatal
fn predict_paths<B: Backend>(
    predictor: &Predictor<B>,
    paths: &[PathBuf],
    batch_size: usize,
) -> Result<(Vec<(PathBuf, Prediction)>, Vec<PathBuf>)> {
    let mut predictions = Vec::with_capacity(paths.len());
    let mut skipped = Vec::new();

    for chunk in paths.chunks(batch_size.max(1)) {
        let mut images: Vec<DynamicImage> = Vec::with_capacity(chunk.len());
        let mut loaded: Vec<PathBuf> = Vec::with_capacity(chunk.len());
        for path in chunk {
            match open_image(path) {
                Ok(img) => {
                    images.push(img);
                    loaded.push(path.clone());
                }
                Err(e) => {
                    warn!("{}", e);
                    skipped.push(path.clone());
                }
            }
        }

        for (path, mut prediction) in loaded.into_iter().zip(predictor.predict_batch(&images)?) {
            prediction.image_path = Some(path.clone());
            predictions.push((path, prediction));
        }
    }

    Ok((predictions, skipped))
}

/// Evaluate a checkpoint on a labelled directory with backend `B`
pub fn evaluate_on<B: Backend>(
    model_path: &Path,
    label_path: &Path,
    test_dir: &Path,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let predictor = Predictor::<B>::load(model_path, label_path, device)?;
    let registry = predictor.registry();

    let samples = scan_labelled(test_dir, registry)?;
    if samples.is_empty() {
        return Err(Error::Dataset(format!(
            "No test images found under {:?}",
            test_dir
        )));
    }
    info!("Evaluating {} images from {:?}", samples.len(), test_dir);

    let paths: Vec<PathBuf> = samples.iter().map(|s| s.path.clone()).collect();
    let (predictions, skipped) = predict_paths(&predictor, &paths, batch_size)?;

    // predict_paths keeps input order, so walk both lists together
    let mut truth = Vec::with_capacity(predictions.len());
    let mut predicted = Vec::with_capacity(predictions.len());
    let mut sample_iter = samples.iter();
    for (path, prediction) in &predictions {
        for sample in sample_iter.by_ref() {
            if &sample.path == path {
                truth.push(sample.label);
                predicted.push(prediction.class_index);
                break;
            }
        }
    }

    let class_names = registry.names().to_vec();
    let metrics =
        Metrics::from_predictions(&predicted, &truth, registry.len()).with_class_names(&class_names);

    info!(
        "Accuracy {:.2}% on {} images ({} skipped)",
        metrics.accuracy * 100.0,
        metrics.total_samples,
        skipped.len()
    );

    Ok(EvaluationReport {
        metrics,
        class_names,
        skipped,
    })
}

/// Evaluate a checkpoint on the default backend
pub fn evaluate(
    model_path: &Path,
    label_path: &Path,
    test_dir: &Path,
    batch_size: usize,
) -> Result<EvaluationReport> {
    evaluate_on::<DefaultBackend>(model_path, label_path, test_dir, batch_size, &default_device())
}

/// Predict every image under `dir` (recursively, sorted) with backend `B`
pub fn predict_directory_on<B: Backend>(
    model_path: &Path,
    label_path: &Path,
    dir: &Path,
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<Prediction>> {
    let predictor = Predictor::<B>::load(model_path, label_path, device)?;
    let paths = images_recursive(dir)?;
    info!("Predicting {} images under {:?}", paths.len(), dir);

    let (predictions, _) = predict_paths(&predictor, &paths, batch_size)?;
    Ok(predictions.into_iter().map(|(_, p)| p).collect())
}

/// Predict every image under `dir` on the default backend
pub fn predict_directory(
    model_path: &Path,
    label_path: &Path,
    dir: &Path,
    batch_size: usize,
) -> Result<Vec<Prediction>> {
    predict_directory_on::<DefaultBackend>(model_path, label_path, dir, batch_size, &default_device())
}
