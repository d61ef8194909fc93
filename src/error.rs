//! Bridge Errors
//!
//! One error type for every layer of the bridge, from library resolution to
//! data marshaling.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the model bridge.
#[derive(Debug, Error)]
pub enum BmiError {
    /// No candidate library file exists. Carries every path tried, in order.
    #[error("Library not found, looked in {}", join_paths(.searched))]
    NotFound {
        engine: String,
        searched: Vec<PathBuf>,
    },

    /// The dynamic loader rejected the library.
    #[error("Failed to load library '{}': {message}", .path.display())]
    Load { path: PathBuf, message: String },

    /// A required entry point is not exported by the library.
    #[error("Symbol '{symbol}' not found in {library}")]
    SymbolNotFound { symbol: String, library: String },

    /// Native `initialize` returned a non-zero status.
    #[error("Loading model {} failed with exit code {code}", .config.display())]
    Initialization { config: PathBuf, code: i32 },

    /// Native `update` returned a non-zero status.
    #[error("Update with dt={dt} failed with exit code {code}")]
    Update { dt: f64, code: i32 },

    /// Native `finalize` returned a non-zero status.
    #[error("Finalize failed with exit code {code}")]
    Finalize { code: i32 },

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The library reported metadata the bridge cannot reconcile, which
    /// means the library and the bridge disagree about the ABI.
    #[error("Consistency fault: {0}")]
    Consistency(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    /// Native `get_var` returned NULL where a value was required.
    #[error("Variable {name} is currently unavailable")]
    Unavailable { name: String },

    /// An argument does not match the declared parameter kind.
    #[error("Signature error: {0}")]
    Signature(String),

    /// Operation called outside its valid lifecycle state.
    #[error("Cannot {operation}: {reason}")]
    InvalidState { operation: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations.
pub type BmiResult<T> = Result<T, BmiError>;

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
