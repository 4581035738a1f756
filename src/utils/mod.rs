//! Utility modules: error types and text formatting.

pub mod errors;
pub mod pretty;

// Re-exports
pub use errors::*;
