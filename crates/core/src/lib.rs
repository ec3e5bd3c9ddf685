//! Surrogate Core - numeric building blocks for batched surrogate inference
//!
//! This crate provides:
//! - The working element types (`f32`, `f64`) and their little-endian wire form
//! - Non-owning 2-D tensor views over caller buffers
//! - GELU activation kernels (reference, fast and block-staged offload form)
//! - Engine configuration read from the environment

pub mod config;
pub mod element;
pub mod error;
pub mod kernel;
pub mod tensor;

pub use config::{EngineConfig, GeluBackend};
pub use element::{DType, Element};
pub use error::{CoreError, Result};
pub use kernel::{
    activation_for, gelu_fast, gelu_fast_scalar, gelu_reference, gelu_reference_scalar, gelu_tiled,
    Activation, FastGelu, ReferenceGelu, TiledGelu, GELU_BLOCK_LEN,
};
pub use tensor::{TensorView, TensorViewMut};
