//! Working element types
//!
//! Weight files are always stored as little-endian `f32`. A model may run in
//! `f32` or `f64`; values are widened once, on the root process, before they
//! are broadcast in the element's own wire representation.

use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};
use ndarray::LinalgScalar;
use num_traits::Float;

/// Element data type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

/// Numeric type a model computes in.
pub trait Element: LinalgScalar + Float + Debug + Default + Send + Sync {
    const DTYPE: DType;

    /// Widen (or keep) a value read from a 32-bit weight file.
    fn from_f32(v: f32) -> Self;

    /// Convert a literal constant into the working precision.
    fn from_f64(v: f64) -> Self;

    /// Encode `src` into `dst`; `dst.len()` must be `src.len() * size_bytes`.
    fn write_le(src: &[Self], dst: &mut [u8]);

    /// Decode `src` into `dst`; `src.len()` must be `dst.len() * size_bytes`.
    fn read_le(src: &[u8], dst: &mut [Self]);

    fn size_bytes() -> usize {
        Self::DTYPE.size_bytes()
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn write_le(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_f32_into(src, dst);
    }

    fn read_le(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_f32_into(src, dst);
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn from_f32(v: f32) -> Self {
        f64::from(v)
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    fn write_le(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_f64_into(src, dst);
    }

    fn read_le(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_f64_into(src, dst);
    }
}
