pub mod config;
pub mod detection;
pub mod pipeline;
pub mod rendering;
pub mod runtime;
pub mod video;
pub mod zone;

// Re-export the top-level pipeline error type so callers only need `roi_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
