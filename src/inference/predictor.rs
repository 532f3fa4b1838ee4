//! Inference Predictor Module
//!
//! Wraps a loaded checkpoint and its label registry. Images are resized to
//! the model's input resolution, scaled to `[0, 1]`, and run through one
//! forward pass; the arg-max of the softmax output is the predicted class.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::burn_dataset::images_to_tensor;
use crate::dataset::labels::LabelRegistry;
use crate::dataset::loader::{image_to_chw, open_image};
use crate::inference::advice::advice_for;
use crate::model::checkpoint::load_checkpoint;
use crate::model::cnn::{check_input_size, PlantClassifier};
use crate::utils::error::{Error, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Image the prediction was made for, when it came from disk
    pub image_path: Option<PathBuf>,

    /// Predicted class name
    pub class: String,

    /// Predicted class index
    pub class_index: usize,

    /// Softmax probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,
}

impl Prediction {
    fn from_probabilities(probabilities: Vec<f32>, registry: &LabelRegistry) -> Self {
        let (class_index, confidence) = argmax(&probabilities);
        Self {
            image_path: None,
            class: registry.name_at(class_index).unwrap_or("unknown").to_string(),
            class_index,
            confidence,
            probabilities,
        }
    }

    /// Confidence rounded to four decimals
    pub fn rounded_confidence(&self) -> f64 {
        (self.confidence as f64 * 10_000.0).round() / 10_000.0
    }

    /// Treatment advice for the predicted class
    pub fn advice(&self) -> &'static str {
        advice_for(&self.class)
    }

    /// The `k` most likely `(index, probability)` pairs, highest first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> =
            self.probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        indexed.truncate(k);
        indexed
    }
}

/// First index of the largest value
fn argmax(values: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, &v) in values.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    if values.is_empty() {
        (0, 0.0)
    } else {
        best
    }
}

/// A loaded model plus its label registry
pub struct Predictor<B: Backend> {
    model: PlantClassifier<B>,
    registry: LabelRegistry,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model: PlantClassifier<B>,
        registry: LabelRegistry,
        image_size: usize,
        device: B::Device,
    ) -> Result<Self> {
        registry.ensure_width(model.num_classes())?;
        check_input_size(model.backbone.num_blocks(), image_size)?;
        Ok(Self {
            model,
            registry,
            image_size,
            device,
        })
    }

    /// Load a checkpoint and registry; the input resolution comes from the checkpoint
    pub fn load(model_path: &Path, label_path: &Path, device: &B::Device) -> Result<Self> {
        let (model, config) = load_checkpoint::<B>(model_path, device)?;
        let registry = LabelRegistry::load(label_path)?;
        info!(
            "Predictor ready: {} classes, {}px input",
            registry.len(),
            config.input_size
        );
        Self::new(model, registry, config.input_size, device.clone())
    }

    /// Override the input resolution recorded in the checkpoint.
    ///
    /// Fails when the feature extractor would pool `image_size` down to nothing.
    pub fn with_image_size(mut self, image_size: usize) -> Result<Self> {
        check_input_size(self.model.backbone.num_blocks(), image_size)?;
        if image_size != self.image_size {
            warn!(
                "Serving at {}px although the model was trained at {}px",
                image_size, self.image_size
            );
            self.image_size = image_size;
        }
        Ok(self)
    }

    pub fn registry(&self) -> &LabelRegistry {
        &self.registry
    }

    pub fn num_classes(&self) -> usize {
        self.registry.len()
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Class probabilities for a batch of decoded images
    pub fn predict_batch(&self, images: &[DynamicImage]) -> Result<Vec<Prediction>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let data: Vec<f32> = images
            .iter()
            .flat_map(|img| image_to_chw(img, self.image_size))
            .collect();
        let input = images_to_tensor::<B>(data, images.len(), self.image_size, &self.device);

        let probabilities = self
            .model
            .forward_softmax(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::Inference(format!("{:?}", e)))?;

        let width = self.registry.len();
        Ok(probabilities
            .chunks(width)
            .map(|row| Prediction::from_probabilities(row.to_vec(), &self.registry))
            .collect())
    }

    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        self.predict_batch(std::slice::from_ref(image))?
            .pop()
            .ok_or_else(|| Error::Inference("Model returned no output".to_string()))
    }

    pub fn predict_image(&self, path: &Path) -> Result<Prediction> {
        let image = open_image(path)?;
        let mut prediction = self.predict(&image)?;
        prediction.image_path = Some(path.to_path_buf());
        Ok(prediction)
    }

    /// Decode an encoded image (PNG, JPEG, ...) and predict
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::Image(format!("Cannot decode uploaded image: {}", e)))?;
        self.predict(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::test_support::write_png;
    use crate::model::checkpoint::save_checkpoint;
    use crate::model::cnn::PlantClassifierConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn saved_predictor(dir: &Path) -> Predictor<TestBackend> {
        let device = Default::default();
        let config = PlantClassifierConfig::new(3)
            .with_input_size(8)
            .with_backbone_filters(vec![4, 4])
            .with_hidden_units(8);
        let model = config.init::<TestBackend>(&device);
        let stem = dir.join("model");
        save_checkpoint(&model, &config, &stem).unwrap();

        let labels = dir.join("labels.json");
        LabelRegistry::new(vec!["a_healthy".into(), "b_rust".into(), "c_blight".into()])
            .unwrap()
            .save(&labels)
            .unwrap();

        Predictor::load(&stem, &labels, &device).unwrap()
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = saved_predictor(dir.path());
        let image_path = dir.path().join("leaf.png");
        write_png(&image_path, 12, [40, 160, 40]);

        let first = predictor.predict_image(&image_path).unwrap();
        let second = predictor.predict_image(&image_path).unwrap();

        assert_eq!(first.class_index, second.class_index);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.probabilities.len(), 3);
        assert_eq!(first.image_path.as_deref(), Some(image_path.as_path()));

        let total: f32 = first.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(first.class, predictor.registry().name_at(first.class_index).unwrap());
    }

    #[test]
    fn test_predict_bytes_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = saved_predictor(dir.path());
        assert!(matches!(
            predictor.predict_bytes(b"definitely not an image"),
            Err(Error::Image(_))
        ));
    }

    #[test]
    fn test_predict_bytes_matches_file() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = saved_predictor(dir.path());
        let image_path = dir.path().join("leaf.png");
        write_png(&image_path, 8, [200, 30, 30]);

        let from_file = predictor.predict_image(&image_path).unwrap();
        let from_bytes = predictor
            .predict_bytes(&std::fs::read(&image_path).unwrap())
            .unwrap();
        assert_eq!(from_file.class_index, from_bytes.class_index);
        assert_eq!(from_file.probabilities, from_bytes.probabilities);
    }

    #[test]
    fn test_registry_width_mismatch() {
        let device = Default::default();
        let model = PlantClassifierConfig::new(2)
            .with_input_size(8)
            .with_backbone_filters(vec![4])
            .init::<TestBackend>(&device);
        let registry = LabelRegistry::new(vec!["x".into(), "y".into(), "z".into()]).unwrap();
        assert!(Predictor::new(model, registry, 8, device).is_err());
    }

    #[test]
    fn test_image_size_override_must_fit_backbone() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("leaf.png");
        write_png(&image_path, 12, [40, 160, 40]);

        assert!(matches!(
            saved_predictor(dir.path()).with_image_size(2),
            Err(Error::Config(_))
        ));
        assert!(saved_predictor(dir.path()).with_image_size(0).is_err());

        let predictor = saved_predictor(dir.path()).with_image_size(16).unwrap();
        assert_eq!(predictor.image_size(), 16);
        assert!(predictor.predict_image(&image_path).is_ok());
    }

    #[test]
    fn test_top_k_and_rounding() {
        let registry = LabelRegistry::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let prediction = Prediction::from_probabilities(vec![0.2, 0.712_345, 0.087_655], &registry);

        assert_eq!(prediction.class, "b");
        assert_eq!(prediction.rounded_confidence(), 0.7123);
        let top: Vec<usize> = prediction.top_k(2).into_iter().map(|(i, _)| i).collect();
        assert_eq!(top, vec![1, 0]);
    }
}
