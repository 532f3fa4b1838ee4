//! Backend selection
//!
//! `NdArray` (CPU) is the default so the crate builds and tests everywhere.
//! The `wgpu` and `cuda` cargo features switch the default backend to a GPU one.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn::backend::Cuda;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type DefaultBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "wgpu", feature = "cuda")))]
pub type DefaultBackend = burn::backend::NdArray;

/// The autodiff backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device for the selected backend
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    Default::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }
    #[cfg(all(feature = "wgpu", not(feature = "cuda")))]
    {
        "WGPU (GPU)"
    }
    #[cfg(not(any(feature = "wgpu", feature = "cuda")))]
    {
        "NdArray (CPU)"
    }
}
