//! Training history: metric name -> one value per epoch

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

pub const LOSS: &str = "loss";
pub const ACCURACY: &str = "accuracy";
pub const VAL_LOSS: &str = "val_loss";
pub const VAL_ACCURACY: &str = "val_accuracy";
pub const LEARNING_RATE: &str = "learning_rate";

/// Per-epoch metric series, persisted as a flat JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory {
    metrics: BTreeMap<String, Vec<f64>>,
}

/// One epoch's worth of metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: f64) {
        self.metrics.entry(key.to_string()).or_default().push(value);
    }

    pub fn record(&mut self, epoch: &EpochMetrics) {
        self.push(LOSS, epoch.loss);
        self.push(ACCURACY, epoch.accuracy);
        self.push(VAL_LOSS, epoch.val_loss);
        self.push(VAL_ACCURACY, epoch.val_accuracy);
        self.push(LEARNING_RATE, epoch.learning_rate);
    }

    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.metrics.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// Number of recorded epochs (length of the longest series)
    pub fn epochs(&self) -> usize {
        self.metrics.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.epochs() == 0
    }

    /// Append `other` key by key; keys only `other` has are created
    pub fn extend(&mut self, other: &TrainingHistory) {
        for (key, values) in &other.metrics {
            self.metrics
                .entry(key.clone())
                .or_default()
                .extend_from_slice(values);
        }
    }

    /// Lowest value of `key` and the epoch it was reached at
    pub fn best_min(&self, key: &str) -> Option<(usize, f64)> {
        self.get(key)?
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Load `path` if it exists, otherwise an empty history
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
