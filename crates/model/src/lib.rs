//! Surrogate Model - loading and batched evaluation of feed-forward surrogates
//!
//! This crate provides:
//! - The YAML model description (`setting.yaml`) and raw weight file naming
//! - `Linear` / `LinearGELU` layers over non-owning tensor views
//! - A collective loader that reads on one rank and broadcasts to all
//! - The inference engine: three model slots, batch tiling over preallocated
//!   scratch buffers, widening into caller-provided outputs
//! - Rank-0 throughput reporting

pub mod engine;
pub mod error;
pub mod layer;
pub mod loader;
pub mod report;
pub mod setting;
pub mod weights;

pub use engine::{InferenceEngine, SlotBatch, NUM_SLOTS};
pub use error::{ModelError, Result};
pub use layer::{Layer, LayerKind, Linear, Model};
pub use loader::{LoadedModels, ModelLoader};
pub use report::InferenceReport;
pub use setting::{LayerEntry, LayerSpec, ModelSetting, WeightLayout, SETTING_FILE};
pub use weights::{bias_file_name, read_f32_file, weight_file_name, write_f32_file};
