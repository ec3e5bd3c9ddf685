//! Raw weight files: naming, reading and writing
//!
//! Each layer `i` of a slot directory has two headerless files of
//! little-endian `f32`:
//! - `linear_{i}_weights_rowmajor_{in}_{out}.data`, `in·out` values, row-major
//!   `in × out` unless the setting declares `weight_layout: out_in`
//! - `linear_{i}_bias_{out}.data`, `out` values

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ModelError, Result};

const F32_BYTES: usize = 4;

pub fn weight_file_name(layer: usize, in_features: usize, out_features: usize) -> String {
    format!(
        "linear_{}_weights_rowmajor_{}_{}.data",
        layer, in_features, out_features
    )
}

pub fn bias_file_name(layer: usize, out_features: usize) -> String {
    format!("linear_{}_bias_{}.data", layer, out_features)
}

/// Read exactly `count` values; a file of any other size is rejected
pub fn read_f32_file(path: &Path, count: usize) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|source| ModelError::WeightFile {
        path: path.display().to_string(),
        source,
    })?;

    let expected_bytes = count * F32_BYTES;
    if bytes.len() != expected_bytes {
        return Err(ModelError::WeightFileSize {
            path: path.display().to_string(),
            expected_bytes,
            got_bytes: bytes.len(),
        });
    }

    let mut values = vec![0f32; count];
    LittleEndian::read_f32_into(&bytes, &mut values);
    Ok(values)
}

pub fn write_f32_file(path: &Path, values: &[f32]) -> Result<()> {
    let mut bytes = vec![0u8; values.len() * F32_BYTES];
    LittleEndian::write_f32_into(values, &mut bytes);
    fs::write(path, bytes)?;
    Ok(())
}

/// Transpose a row-major `rows × cols` matrix
pub fn transpose(values: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0f32; values.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = values[r * cols + c];
        }
    }
    out
}
