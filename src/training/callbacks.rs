//! Epoch-end callbacks monitoring `val_loss`
//!
//! Each callback is a small state machine fed one validation loss per epoch.
//! A fresh set is created for every training phase.

use tracing::{debug, info};

/// Outcome of feeding one epoch to [`EarlyStopping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// New best value; the caller should snapshot the weights
    Improved,
    /// No improvement, patience not yet exhausted
    Continue,
    /// Patience exhausted; the caller should restore the best weights and stop
    Stop,
}

/// Stop after `patience` epochs without a decrease of the monitored value
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    epoch: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            epoch: 0,
        }
    }

    pub fn update(&mut self, value: f64) -> StopDecision {
        let epoch = self.epoch;
        self.epoch += 1;

        if value < self.best - self.min_delta {
            self.best = value;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return StopDecision::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            info!(
                "Early stopping: no val_loss improvement for {} epochs (best {:.4} at epoch {})",
                self.wait,
                self.best,
                self.best_epoch.map(|e| e + 1).unwrap_or(0)
            );
            StopDecision::Stop
        } else {
            StopDecision::Continue
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Multiply the learning rate by `factor` after `patience` epochs on a plateau
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Feed one epoch's value; returns the learning rate for the next epoch
    pub fn update(&mut self, value: f64, lr: f64) -> f64 {
        if value < self.best - self.min_delta {
            self.best = value;
            self.wait = 0;
            return lr;
        }

        self.wait += 1;
        if self.wait < self.patience {
            return lr;
        }

        self.wait = 0;
        if lr <= self.min_lr {
            return lr;
        }

        let new_lr = (lr * self.factor).max(self.min_lr);
        info!("Reducing learning rate: {:.2e} -> {:.2e}", lr, new_lr);
        new_lr
    }
}

/// Tracks whether an epoch improved `val_loss` enough to save a checkpoint
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    best: f64,
}

impl Default for BestCheckpoint {
    fn default() -> Self {
        Self {
            best: f64::INFINITY,
        }
    }
}

impl BestCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `value` beats every previous value
    pub fn should_save(&mut self, value: f64) -> bool {
        if value < self.best {
            debug!("val_loss improved {:.4} -> {:.4}", self.best, value);
            self.best = value;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping_patience() {
        let mut es = EarlyStopping::new(2);
        assert_eq!(es.update(1.0), StopDecision::Improved);
        assert_eq!(es.update(0.8), StopDecision::Improved);
        assert_eq!(es.update(0.9), StopDecision::Continue);
        assert_eq!(es.update(0.85), StopDecision::Stop);
        assert_eq!(es.best(), Some(0.8));
        assert_eq!(es.best_epoch(), Some(1));
    }

    #[test]
    fn test_early_stopping_resets_on_improvement() {
        let mut es = EarlyStopping::new(2);
        es.update(1.0);
        assert_eq!(es.update(1.1), StopDecision::Continue);
        assert_eq!(es.update(0.5), StopDecision::Improved);
        assert_eq!(es.update(0.6), StopDecision::Continue);
        assert_eq!(es.update(0.7), StopDecision::Stop);
    }

    #[test]
    fn test_early_stopping_equal_value_is_not_improvement() {
        let mut es = EarlyStopping::new(1);
        es.update(0.5);
        assert_eq!(es.update(0.5), StopDecision::Stop);
    }

    #[test]
    fn test_plateau_reduces_after_patience() {
        let mut plateau = ReduceLrOnPlateau::new(0.2, 3, 1e-7);
        let mut lr = 1e-4;

        lr = plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-4);

        lr = plateau.update(1.0, lr);
        assert!((lr - 2e-5).abs() < 1e-12);

        // Wait counter restarts after a reduction
        lr = plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        assert!((lr - 2e-5).abs() < 1e-12);
        lr = plateau.update(1.0, lr);
        assert!((lr - 4e-6).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_respects_min_lr() {
        let mut plateau = ReduceLrOnPlateau::new(0.2, 1, 1e-7);
        let mut lr = 2e-7;
        plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-7);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-7);
    }

    #[test]
    fn test_plateau_small_improvement_counts_as_plateau() {
        let mut plateau = ReduceLrOnPlateau::new(0.5, 1, 0.0);
        plateau.update(1.0, 1.0);
        assert_eq!(plateau.update(0.99995, 1.0), 0.5);
    }

    #[test]
    fn test_best_checkpoint() {
        let mut best = BestCheckpoint::new();
        assert!(best.should_save(1.0));
        assert!(!best.should_save(1.0));
        assert!(best.should_save(0.3));
        assert!(!best.should_save(0.4));
    }
}
