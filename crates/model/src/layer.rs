//! Affine layers and their composition into a model
//!
//! A layer computes `Y = X · Wᵀ + b` for a row-major `rows × in` input `X`,
//! an `out × in` weight matrix `W` and an `out` bias `b`. `LinearGELU`
//! additionally applies the engine's GELU backend to `Y` in place.

use ndarray::{linalg::general_mat_mul, ArrayView2};
use rayon::prelude::*;
use surrogate_core::{Activation, CoreError, Element, TensorView, TensorViewMut};

use crate::error::{ModelError, Result};

/// Rows per rayon task when adding the bias
const BIAS_MIN_ROWS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Linear,
    LinearGelu,
}

impl LayerKind {
    /// Resolve the `type` string of a layer descriptor
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Linear" => Some(LayerKind::Linear),
            "LinearGELU" => Some(LayerKind::LinearGelu),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Linear => "Linear",
            LayerKind::LinearGelu => "LinearGELU",
        }
    }
}

/// Parameters of one affine layer, weights row-major `out × in`
#[derive(Debug, Clone, PartialEq)]
pub struct Linear<E> {
    in_features: usize,
    out_features: usize,
    weights: Vec<E>,
    bias: Vec<E>,
}

impl<E: Element> Linear<E> {
    pub fn new(in_features: usize, out_features: usize, weights: Vec<E>, bias: Vec<E>) -> Result<Self> {
        if weights.len() != in_features * out_features {
            return Err(ModelError::ShapeMismatch {
                name: "weights".into(),
                expected: vec![out_features, in_features],
                got: vec![weights.len()],
            });
        }
        if bias.len() != out_features {
            return Err(ModelError::ShapeMismatch {
                name: "bias".into(),
                expected: vec![out_features],
                got: vec![bias.len()],
            });
        }
        Ok(Self {
            in_features,
            out_features,
            weights,
            bias,
        })
    }

    /// Zero-filled parameters, the receive buffers of non-root ranks
    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            weights: vec![E::zero(); in_features * out_features],
            bias: vec![E::zero(); out_features],
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weights(&self) -> &[E] {
        &self.weights
    }

    pub fn bias(&self) -> &[E] {
        &self.bias
    }

    pub(crate) fn weights_mut(&mut self) -> &mut [E] {
        &mut self.weights
    }

    pub(crate) fn bias_mut(&mut self) -> &mut [E] {
        &mut self.bias
    }

    /// `output = input · Wᵀ + b`; every output element is overwritten
    pub fn affine(&self, input: &TensorView<'_, E>, output: &mut TensorViewMut<'_, E>) -> Result<()> {
        if input.cols() != self.in_features
            || output.cols() != self.out_features
            || output.rows() != input.rows()
        {
            return Err(ModelError::ShapeMismatch {
                name: "layer io".into(),
                expected: vec![input.rows(), self.in_features, self.out_features],
                got: vec![output.rows(), input.cols(), output.cols()],
            });
        }

        let w = ArrayView2::from_shape((self.out_features, self.in_features), self.weights.as_slice())
            .map_err(CoreError::from)?;
        let x = input.as_array()?;
        {
            let mut y = output.as_array_mut()?;
            general_mat_mul(E::one(), &x, &w.t(), E::zero(), &mut y);
        }

        let bias = self.bias.as_slice();
        output
            .data_mut()
            .par_chunks_mut(self.out_features)
            .with_min_len(BIAS_MIN_ROWS)
            .for_each(|row| {
                for (v, b) in row.iter_mut().zip(bias) {
                    *v = *v + *b;
                }
            });
        Ok(())
    }
}

/// One layer of a model
#[derive(Debug, Clone, PartialEq)]
pub enum Layer<E> {
    Linear(Linear<E>),
    LinearGelu(Linear<E>),
}

impl<E: Element> Layer<E> {
    pub fn new(kind: LayerKind, params: Linear<E>) -> Self {
        match kind {
            LayerKind::Linear => Layer::Linear(params),
            LayerKind::LinearGelu => Layer::LinearGelu(params),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Linear(_) => LayerKind::Linear,
            Layer::LinearGelu(_) => LayerKind::LinearGelu,
        }
    }

    pub fn params(&self) -> &Linear<E> {
        match self {
            Layer::Linear(p) | Layer::LinearGelu(p) => p,
        }
    }

    pub fn in_features(&self) -> usize {
        self.params().in_features()
    }

    pub fn out_features(&self) -> usize {
        self.params().out_features()
    }

    pub fn forward(
        &self,
        input: &TensorView<'_, E>,
        output: &mut TensorViewMut<'_, E>,
        activation: &dyn Activation<E>,
    ) -> Result<()> {
        self.params().affine(input, output)?;
        if let Layer::LinearGelu(_) = self {
            activation.apply(output.data_mut());
        }
        Ok(())
    }
}

/// An ordered, shape-chained list of layers
#[derive(Debug, Clone, PartialEq)]
pub struct Model<E> {
    layers: Vec<Layer<E>>,
}

impl<E: Element> Model<E> {
    pub fn new(layers: Vec<Layer<E>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(ModelError::InvalidSetting("model has no layers".into()));
        }
        for (i, pair) in layers.windows(2).enumerate() {
            if pair[0].out_features() != pair[1].in_features() {
                return Err(ModelError::ShapeMismatch {
                    name: format!("layer {} input", i + 1),
                    expected: vec![pair[0].out_features()],
                    got: vec![pair[1].in_features()],
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Layer<E>] {
        &self.layers
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// `[in_0, out_0, out_1, ...]`
    pub fn widths(&self) -> Vec<usize> {
        std::iter::once(self.layers[0].in_features())
            .chain(self.layers.iter().map(|l| l.out_features()))
            .collect()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].in_features()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surrogate_core::{gelu_reference_scalar, ReferenceGelu};

    fn small_linear() -> Linear<f32> {
        // W (2 × 3), b (2)
        Linear::new(3, 2, vec![1.0, 0.0, -1.0, 0.5, 2.0, 1.0], vec![0.1, -0.2]).unwrap()
    }

    #[test]
    fn test_layer_kind_names() {
        assert_eq!(LayerKind::from_name("Linear"), Some(LayerKind::Linear));
        assert_eq!(LayerKind::from_name("LinearGELU"), Some(LayerKind::LinearGelu));
        assert_eq!(LayerKind::from_name("linear"), None);
        assert_eq!(LayerKind::LinearGelu.name(), "LinearGELU");
    }

    #[test]
    fn test_affine_uses_transposed_weights() {
        let linear = small_linear();
        let input = [1.0f32, 2.0, 3.0, -1.0, 0.0, 1.0];
        let mut out = [f32::NAN; 4];

        let x = TensorView::new(2, 3, &input).unwrap();
        let mut y = TensorViewMut::new(2, 2, &mut out).unwrap();
        linear.affine(&x, &mut y).unwrap();

        // row 0: [1-3, 0.5+4+3] + b ; row 1: [-1-1, -0.5+0+1] + b
        let expected = [-2.0 + 0.1, 7.5 - 0.2, -2.0 + 0.1, 0.5 - 0.2];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_affine_rejects_wrong_shapes() {
        let linear = small_linear();
        let input = [0.0f32; 4];
        let mut out = [0.0f32; 2];
        let x = TensorView::new(1, 4, &input).unwrap();
        let mut y = TensorViewMut::new(1, 2, &mut out).unwrap();
        assert!(matches!(
            linear.affine(&x, &mut y),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_new_checks_lengths() {
        assert!(Linear::<f32>::new(3, 2, vec![0.0; 5], vec![0.0; 2]).is_err());
        assert!(Linear::<f32>::new(3, 2, vec![0.0; 6], vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_linear_gelu_applies_activation() {
        let layer = Layer::new(LayerKind::LinearGelu, small_linear());
        let input = [1.0f32, 2.0, 3.0];
        let mut out = [0.0f32; 2];
        let x = TensorView::new(1, 3, &input).unwrap();
        let mut y = TensorViewMut::new(1, 2, &mut out).unwrap();
        layer.forward(&x, &mut y, &ReferenceGelu).unwrap();

        let mut affine = [0.0f32; 2];
        let mut y = TensorViewMut::new(1, 2, &mut affine).unwrap();
        small_linear().affine(&x, &mut y).unwrap();
        assert_eq!(out[0], gelu_reference_scalar(affine[0]));
        assert_eq!(out[1], gelu_reference_scalar(affine[1]));
    }

    #[test]
    fn test_model_chain_is_checked() {
        let a = Layer::new(LayerKind::LinearGelu, Linear::<f64>::zeros(4, 3));
        let b = Layer::new(LayerKind::Linear, Linear::<f64>::zeros(3, 2));
        let model = Model::new(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(model.widths(), vec![4, 3, 2]);
        assert_eq!(model.input_dim(), 4);
        assert_eq!(model.output_dim(), 2);

        let bad = Layer::new(LayerKind::Linear, Linear::<f64>::zeros(5, 2));
        assert!(Model::new(vec![a, bad]).is_err());
        assert!(Model::<f64>::new(Vec::new()).is_err());
    }
}
