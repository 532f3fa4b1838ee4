//! Application state for the prediction server

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use plant_disease::backend::{default_device, DefaultBackend};
use plant_disease::Predictor;
use tracing::{error, info};

pub type SharedState = Arc<AppState>;

/// Shared application state
pub struct AppState {
    /// Loaded once at start-up; `None` when the model could not be loaded
    pub predictor: Mutex<Option<Predictor<DefaultBackend>>>,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(predictor: Option<Predictor<DefaultBackend>>) -> Self {
        Self {
            predictor: Mutex::new(predictor),
            started_at: Instant::now(),
        }
    }

    /// Load the checkpoint and registry.
    ///
    /// A checkpoint that cannot be loaded is logged and leaves the server model-less.
    /// An `image_size` override the model cannot take is rejected.
    pub fn load(
        model_path: &Path,
        label_path: &Path,
        image_size: Option<usize>,
    ) -> plant_disease::Result<Self> {
        let loaded =
            Predictor::<DefaultBackend>::load(model_path, label_path, &default_device());
        let predictor = match loaded {
            Ok(predictor) => {
                let predictor = match image_size {
                    Some(size) => predictor.with_image_size(size)?,
                    None => predictor,
                };
                info!(
                    "Model loaded from {:?} ({} classes, {}px input)",
                    model_path,
                    predictor.num_classes(),
                    predictor.image_size()
                );
                Some(predictor)
            }
            Err(e) => {
                error!("Model not loaded: {}. /predict will return 500.", e);
                None
            }
        };
        Ok(Self::new(predictor))
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Number of classes of the loaded model, if any
    pub fn num_classes(&self) -> Option<usize> {
        match self.predictor.lock() {
            Ok(guard) => guard.as_ref().map(|p| p.num_classes()),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|p| p.num_classes()),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
