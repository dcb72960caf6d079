//! Backend abstraction - inference backends
//!
//! NdArray (CPU) by default, CUDA when built with the `cuda` feature.
//! Serving never trains, so no autodiff backend is exposed.

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (opt-in) or NdArray (default)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type InferenceBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

/// Device type of the inference backend
pub type InferenceDevice = <InferenceBackend as burn::tensor::backend::Backend>::Device;

/// Get the default device
pub fn default_device() -> InferenceDevice {
    InferenceDevice::default()
}

/// Short device label reported by the health endpoint
pub fn device_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "cuda"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "cpu"
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
