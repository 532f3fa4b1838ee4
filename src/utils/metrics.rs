//! Classification metrics
//!
//! Per-class precision / recall / F1, macro and support-weighted averages,
//! and a confusion matrix (rows = actual, columns = predicted).

use serde::{Deserialize, Serialize};

/// Aggregate metrics over one evaluation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build metrics from parallel slices of predicted and actual class indices.
    ///
    /// Indices outside `0..num_classes` are ignored by the confusion matrix.
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let total_samples = predictions.len().min(ground_truth.len());
        if total_samples == 0 {
            return Self {
                confusion_matrix: ConfusionMatrix::new(num_classes),
                ..Self::default()
            };
        }

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let correct_predictions = predictions
            .iter()
            .zip(ground_truth.iter())
            .filter(|(p, g)| p == g)
            .count();

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx))
            .collect();

        // Classes absent from the ground truth do not count towards macro averages
        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let macro_avg = |f: fn(&ClassMetrics) -> f64| {
            if supported.is_empty() {
                0.0
            } else {
                supported.iter().map(|m| f(m)).sum::<f64>() / supported.len() as f64
            }
        };

        let macro_precision = macro_avg(|m| m.precision);
        let macro_recall = macro_avg(|m| m.recall);
        let macro_f1 = macro_avg(|m| m.f1);

        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted_f1 = if total_support > 0 {
            per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / total_support as f64
        } else {
            0.0
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy: correct_predictions as f64 / total_samples as f64,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// Attach class names to the per-class rows
    pub fn with_class_names(mut self, names: &[String]) -> Self {
        for m in &mut self.per_class {
            if let Some(name) = names.get(m.class_idx) {
                m.class_name = Some(name.clone());
            }
        }
        self
    }

    /// Text report in the familiar precision / recall / f1 / support layout
    pub fn classification_report(&self) -> String {
        let width = self
            .per_class
            .iter()
            .filter_map(|m| m.class_name.as_ref().map(|n| n.len()))
            .max()
            .unwrap_or(8)
            .max(12);

        let mut out = format!(
            "{:>width$}  {:>9}  {:>9}  {:>9}  {:>7}\n\n",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            width = width
        );

        for m in &self.per_class {
            let name = m
                .class_name
                .clone()
                .unwrap_or_else(|| m.class_idx.to_string());
            out.push_str(&format!(
                "{:>width$}  {:>9.4}  {:>9.4}  {:>9.4}  {:>7}\n",
                name,
                m.precision,
                m.recall,
                m.f1,
                m.support,
                width = width
            ));
        }

        out.push('\n');
        out.push_str(&format!(
            "{:>width$}  {:>9}  {:>9}  {:>9.4}  {:>7}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_samples,
            width = width
        ));
        out.push_str(&format!(
            "{:>width$}  {:>9.4}  {:>9.4}  {:>9.4}  {:>7}\n",
            "macro avg",
            self.macro_precision,
            self.macro_recall,
            self.macro_f1,
            self.total_samples,
            width = width
        ));
        out.push_str(&format!(
            "{:>width$}  {:>9}  {:>9}  {:>9.4}  {:>7}\n",
            "weighted f1",
            "",
            "",
            self.weighted_f1,
            self.total_samples,
            width = width
        ));
        out
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP)
    pub precision: f64,
    /// TP / (TP + FN)
    pub recall: f64,
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for one class from a confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Confusion matrix stored row-major (row = actual, column = predicted)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// Render as a text grid, class names abbreviated to fit
    pub fn display(&self, class_names: Option<&[String]>) -> String {
        let mut output = String::from("Confusion Matrix (rows=actual, cols=predicted):\n\n");

        let label = |idx: usize, len: usize| -> String {
            match class_names.and_then(|names| names.get(idx)) {
                Some(name) => name.chars().take(len).collect(),
                None => idx.to_string(),
            }
        };

        output.push_str(&format!("{:>12} ", ""));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>7}", label(col, 6)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>12} ", label(row, 12)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!(" [{:>4}]", count));
                } else if count > 0 {
                    output.push_str(&format!("  {:>4} ", count));
                } else {
                    output.push_str("     . ");
                }
            }
            output.push('\n');
        }

        output
    }

    /// Save to CSV with class names as headers; names are quoted as needed
    pub fn save_csv(
        &self,
        path: &std::path::Path,
        class_names: &[String],
    ) -> std::io::Result<()> {
        let name = |idx: usize| {
            class_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| idx.to_string())
        };

        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["actual\\predicted".to_string()];
        header.extend((0..self.num_classes).map(&name));
        writer.write_record(&header)?;

        for row in 0..self.num_classes {
            let mut record = vec![name(row)];
            record.extend((0..self.num_classes).map(|col| self.get(row, col).to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()
    }
}

/// Running average of a scalar
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value carrying `weight` samples
    pub fn add(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let preds = vec![0, 1, 2, 0, 1, 2];
        let metrics = Metrics::from_predictions(&preds, &preds, 3);

        assert_eq!(metrics.correct_predictions, 6);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.macro_f1, 1.0);
        assert_eq!(metrics.confusion_matrix.correct(), 6);
    }

    #[test]
    fn test_precision_recall() {
        // class 0: 2 actual, both predicted 0; class 1: 2 actual, one predicted 0
        let actual = vec![0, 0, 1, 1];
        let preds = vec![0, 0, 0, 1];
        let metrics = Metrics::from_predictions(&preds, &actual, 2);

        let c0 = &metrics.per_class[0];
        assert_eq!(c0.true_positives, 2);
        assert_eq!(c0.false_positives, 1);
        assert!((c0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(c0.recall, 1.0);

        let c1 = &metrics.per_class[1];
        assert_eq!(c1.precision, 1.0);
        assert_eq!(c1.recall, 0.5);
        assert_eq!(c1.support, 2);

        assert_eq!(metrics.confusion_matrix.get(1, 0), 1);
        assert_eq!(metrics.accuracy, 0.75);
    }

    #[test]
    fn test_unsupported_class_excluded_from_macro() {
        let actual = vec![0, 0];
        let preds = vec![0, 0];
        let metrics = Metrics::from_predictions(&preds, &actual, 3);
        assert_eq!(metrics.macro_recall, 1.0);
        assert_eq!(metrics.per_class[2].support, 0);
    }

    #[test]
    fn test_empty_predictions() {
        let metrics = Metrics::from_predictions(&[], &[], 4);
        assert_eq!(metrics.total_samples, 0);
        assert_eq!(metrics.confusion_matrix.num_classes, 4);
    }

    #[test]
    fn test_report_contains_names() {
        let names = vec!["apple_scab".to_string(), "apple_healthy".to_string()];
        let metrics = Metrics::from_predictions(&[0, 1], &[0, 1], 2).with_class_names(&names);
        let report = metrics.classification_report();
        assert!(report.contains("apple_scab"));
        assert!(report.contains("macro avg"));
    }

    #[test]
    fn test_confusion_csv_quotes_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confusion.csv");
        let names = vec!["leaf, spotted".to_string(), "say \"hi\"".to_string()];

        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1], &[0, 0, 1], 2);
        cm.save_csv(&path, &names).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"leaf, spotted\""));
        assert!(raw.contains("\"say \"\"hi\"\"\""));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, vec!["actual\\predicted", "leaf, spotted", "say \"hi\""]);

        let rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["leaf, spotted", "1", "1"]);
        assert_eq!(rows[1], vec!["say \"hi\"", "0", "1"]);
    }

    #[test]
    fn test_running_average_weighted() {
        let mut avg = RunningAverage::new();
        avg.add(1.0, 1);
        avg.add(4.0, 3);
        assert_eq!(avg.count(), 4);
        assert!((avg.average() - 3.25).abs() < 1e-12);
    }
}
