//! Inference module
//!
//! - `predictor`: single-image and batched prediction from a saved checkpoint
//! - `evaluator`: held-out evaluation and unlabelled directory listings
//! - `advice`: treatment advice per predicted class

pub mod advice;
pub mod evaluator;
pub mod predictor;

pub use advice::advice_for;
pub use evaluator::{evaluate, predict_directory, EvaluationReport};
pub use predictor::{Prediction, Predictor};
