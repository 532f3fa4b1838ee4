//! Training module
//!
//! - `lifecycle`: which model to train and the two-phase / resume schedules
//! - `trainer`: the per-phase Burn training loop
//! - `callbacks`: early stopping, reduce-on-plateau, best-checkpoint tracking
//! - `history`: per-epoch metric series persisted across sessions

pub mod callbacks;
pub mod history;
pub mod lifecycle;
pub mod trainer;

pub use callbacks::{BestCheckpoint, EarlyStopping, ReduceLrOnPlateau, StopDecision};
pub use history::{EpochMetrics, TrainingHistory};
pub use lifecycle::{ModelLifecycle, ModelOrigin, PreparedModel, TrainingReport};
pub use trainer::{evaluate_loss, run_phase, LossAccuracy, PhaseOutcome, PhaseSettings};
