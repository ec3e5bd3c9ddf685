//! Model error types

use surrogate_comm::CommError;
use surrogate_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Communication error: {0}")]
    Comm(#[from] CommError),

    #[error("Cannot open setting file {path}: {source}")]
    SettingNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open weight file {path}: {source}")]
    WeightFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Weight file {path} holds {got_bytes} bytes, expected {expected_bytes}")]
    WeightFileSize {
        path: String,
        expected_bytes: usize,
        got_bytes: usize,
    },

    #[error("Unknown layer type: {0}")]
    UnknownLayerType(String),

    #[error("Invalid model setting: {0}")]
    InvalidSetting(String),

    #[error("Shape mismatch for {name}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Loading failed on root rank {root}")]
    RootFailed { root: usize },

    #[error("Models are not loaded")]
    NotLoaded,

    #[error("Slot {slot} out of range")]
    SlotOutOfRange { slot: usize },

    #[error("Input of slot {slot} holds {got} values, {needed} needed")]
    InputTooShort { slot: usize, needed: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
