//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (GPU acceleration through CUDA or `CoreML`)
//! - Tract backend (pure Rust, CPU only)

use crate::config::ComputeDevice;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

/// Whether the runtime linked into this build can drive `device`
///
/// The CPU is always available. Accelerators are only reachable through ONNX
/// Runtime, so builds without the `onnx` feature report them unavailable.
#[must_use]
pub fn accelerator_available(device: ComputeDevice) -> bool {
    match device {
        ComputeDevice::Cpu => true,
        #[cfg(feature = "onnx")]
        accelerator => onnx::OnnxBackend::provider_available(accelerator),
        #[cfg(not(feature = "onnx"))]
        _ => false,
    }
}
