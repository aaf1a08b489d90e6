//! Utility modules shared by the backends

pub mod preprocessing;

pub use preprocessing::InpaintPreprocessor;
