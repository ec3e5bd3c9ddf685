//! Model description (`setting.yaml`)
//!
//! ```yaml
//! layers: [4, 3, 2]
//! model:
//!   - layer: { type: LinearGELU, in_features: 4, out_features: 3 }
//!   - layer: { type: Linear, in_features: 3, out_features: 2 }
//! ```
//!
//! `weight_layout` is optional: `in_out` (default) stores weight rows per
//! input feature, as the file name `..._rowmajor_{in}_{out}` says; `out_in`
//! stores them per output feature.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::layer::LayerKind;

/// File name of the model description inside slot directory `0`
pub const SETTING_FILE: &str = "setting.yaml";

/// Row-major orientation of the weight files on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightLayout {
    /// `in_features × out_features`
    #[default]
    InOut,
    /// `out_features × in_features`
    OutIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub in_features: usize,
    pub out_features: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub layer: LayerSpec,
}

/// Width schedule and per-layer descriptors shared by all three slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSetting {
    /// `layers[0]` is the input width, `layers[i]` the output width of layer i-1
    pub layers: Vec<usize>,
    #[serde(default)]
    pub weight_layout: WeightLayout,
    pub model: Vec<LayerEntry>,
}

impl ModelSetting {
    /// Build a setting from a width schedule and one kind per layer
    pub fn from_schedule(layers: &[usize], kinds: &[LayerKind]) -> Result<Self> {
        if layers.len() != kinds.len() + 1 {
            return Err(ModelError::InvalidSetting(format!(
                "{} widths cannot describe {} layers",
                layers.len(),
                kinds.len()
            )));
        }
        let model = kinds
            .iter()
            .zip(layers.windows(2))
            .map(|(kind, w)| LayerEntry {
                layer: LayerSpec {
                    kind: kind.name().to_string(),
                    in_features: w[0],
                    out_features: w[1],
                },
            })
            .collect();

        Ok(Self {
            layers: layers.to_vec(),
            weight_layout: WeightLayout::default(),
            model,
        })
    }

    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_weight_layout(mut self, layout: WeightLayout) -> Self {
        self.weight_layout = layout;
        self
    }

    /// Check the schedule against the layer list and resolve layer kinds
    pub fn validate(&self) -> Result<Vec<LayerKind>> {
        if self.model.is_empty() {
            return Err(ModelError::InvalidSetting("model has no layers".into()));
        }
        if self.layers.len() != self.model.len() + 1 {
            return Err(ModelError::InvalidSetting(format!(
                "layers lists {} widths for {} layers",
                self.layers.len(),
                self.model.len()
            )));
        }
        if let Some(pos) = self.layers.iter().position(|&w| w == 0) {
            return Err(ModelError::InvalidSetting(format!("layers[{}] is zero", pos)));
        }

        self.model
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let spec = &entry.layer;
                let expected = [self.layers[i], self.layers[i + 1]];
                if [spec.in_features, spec.out_features] != expected {
                    return Err(ModelError::ShapeMismatch {
                        name: format!("layer {}", i),
                        expected: expected.to_vec(),
                        got: vec![spec.in_features, spec.out_features],
                    });
                }
                LayerKind::from_name(&spec.kind)
                    .ok_or_else(|| ModelError::UnknownLayerType(spec.kind.clone()))
            })
            .collect()
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().copied().unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().copied().unwrap_or(0)
    }

    /// Multiply-add count of one forward pass: `2 · Σ layers[i-1] · layers[i]`
    pub fn flops_per_sample(&self) -> f64 {
        self.layers
            .windows(2)
            .map(|w| 2.0 * w[0] as f64 * w[1] as f64)
            .sum()
    }
}
