//! Core error types

use thiserror::Error;

/// Core Result type
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("View {rows}x{cols} exceeds buffer of {len} elements")]
    ViewOutOfBounds { rows: usize, cols: usize, len: usize },

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
