//! Plaintext reference implementation
//!
//! Evaluates one sample at a time in `f64` with straightforward loops and the
//! reference GELU. Used to verify the tiled, parallel engine.

use surrogate_core::gelu_reference_scalar;
use surrogate_model::LayerKind;

use crate::error::{HarnessError, Result};
use crate::fixtures::FixtureLayer;

pub struct PlaintextReference {
    layers: Vec<FixtureLayer>,
}

impl PlaintextReference {
    pub fn new(layers: Vec<FixtureLayer>) -> Self {
        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.in_features)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.out_features)
    }

    /// `y = W·x + b`, then GELU for `LinearGELU`
    pub fn layer(&self, layer: &FixtureLayer, x: &[f64]) -> Vec<f64> {
        (0..layer.out_features)
            .map(|o| {
                let row = &layer.weights[o * layer.in_features..(o + 1) * layer.in_features];
                let y = row
                    .iter()
                    .zip(x)
                    .fold(f64::from(layer.bias[o]), |acc, (w, v)| acc + f64::from(*w) * v);
                match layer.kind {
                    LayerKind::Linear => y,
                    LayerKind::LinearGelu => gelu_reference_scalar(y),
                }
            })
            .collect()
    }

    pub fn forward_sample(&self, x: &[f64]) -> Vec<f64> {
        self.layers
            .iter()
            .fold(x.to_vec(), |hidden, layer| self.layer(layer, &hidden))
    }

    /// Evaluate `samples` rows of `input`
    pub fn forward(&self, input: &[f32], samples: usize) -> Result<Vec<f64>> {
        let in_dim = self.input_dim();
        if in_dim == 0 {
            return Err(HarnessError::InvalidInput("reference has no layers".into()));
        }
        if input.len() < samples * in_dim {
            return Err(HarnessError::InvalidInput(format!(
                "{} values for {} samples of width {}",
                input.len(),
                samples,
                in_dim
            )));
        }

        let mut out = Vec::with_capacity(samples * self.output_dim());
        for row in input.chunks_exact(in_dim).take(samples) {
            let x: Vec<f64> = row.iter().map(|&v| f64::from(v)).collect();
            out.extend(self.forward_sample(&x));
        }
        Ok(out)
    }
}

pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Fail unless `got` and `want` have equal length and differ by at most `tol`
pub fn verify_close(got: &[f64], want: &[f64], tol: f64) -> Result<()> {
    if got.len() != want.len() {
        return Err(HarnessError::VerificationFailed {
            message: format!("length {} vs {}", got.len(), want.len()),
        });
    }
    let diff = max_abs_diff(got, want);
    if diff > tol {
        return Err(HarnessError::VerificationFailed {
            message: format!("max abs diff {:.3e} exceeds {:.1e}", diff, tol),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_layer(kind: LayerKind) -> FixtureLayer {
        FixtureLayer {
            kind,
            in_features: 2,
            out_features: 2,
            weights: vec![1.0, 0.0, 0.0, 1.0],
            bias: vec![0.0, 1.0],
        }
    }

    #[test]
    fn test_linear_layer() {
        let reference = PlaintextReference::new(vec![identity_layer(LayerKind::Linear)]);
        assert_eq!(reference.forward(&[3.0, -2.0], 1).unwrap(), vec![3.0, -1.0]);
    }

    #[test]
    fn test_gelu_layer() {
        let reference = PlaintextReference::new(vec![identity_layer(LayerKind::LinearGelu)]);
        let out = reference.forward_sample(&[0.0, -1.0]);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_short_input() {
        let reference = PlaintextReference::new(vec![identity_layer(LayerKind::Linear)]);
        assert!(reference.forward(&[1.0, 2.0, 3.0], 2).is_err());
    }

    #[test]
    fn test_verify_close() {
        assert!(verify_close(&[1.0, 2.0], &[1.0, 2.0 + 1e-9], 1e-6).is_ok());
        assert!(verify_close(&[1.0, 2.0], &[1.0, 2.1], 1e-6).is_err());
        assert!(verify_close(&[1.0], &[1.0, 2.0], 1e-6).is_err());
    }
}
