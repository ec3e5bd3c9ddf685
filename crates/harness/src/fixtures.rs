//! On-disk model fixtures
//!
//! Writes `setting.yaml` into slot directory `0` and the weight and bias
//! files of every layer into slot directories `0`, `1` and `2`, each slot
//! with its own seeded random parameters.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use surrogate_model::weights::transpose;
use surrogate_model::{
    bias_file_name, weight_file_name, write_f32_file, LayerKind, ModelSetting, WeightLayout,
    NUM_SLOTS, SETTING_FILE,
};
use tempfile::TempDir;

use crate::error::{HarnessError, Result};
use crate::reference::PlaintextReference;

/// Parameters of one fixture layer, weights `out × in` regardless of layout
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureLayer {
    pub kind: LayerKind,
    pub in_features: usize,
    pub out_features: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Description of a synthetic model to write
#[derive(Debug, Clone)]
pub struct ModelFixture {
    layers: Vec<usize>,
    kinds: Vec<LayerKind>,
    layout: WeightLayout,
    seed: u64,
}

impl ModelFixture {
    pub fn new(layers: &[usize], kinds: &[LayerKind]) -> Self {
        Self {
            layers: layers.to_vec(),
            kinds: kinds.to_vec(),
            layout: WeightLayout::default(),
            seed: 0x5eed,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_layout(mut self, layout: WeightLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn setting(&self) -> Result<ModelSetting> {
        Ok(ModelSetting::from_schedule(&self.layers, &self.kinds)?.with_weight_layout(self.layout))
    }

    /// Write the fixture into a fresh temporary directory
    pub fn write_temp(&self) -> Result<WrittenFixture> {
        let dir = tempfile::tempdir()?;
        let mut written = self.write(dir.path())?;
        written.temp = Some(dir);
        Ok(written)
    }

    /// Write the fixture below `root`
    pub fn write(&self, root: &Path) -> Result<WrittenFixture> {
        let setting = self.setting()?;

        let mut slots = Vec::with_capacity(NUM_SLOTS);
        for slot in 0..NUM_SLOTS {
            let dir = root.join(slot.to_string());
            fs::create_dir_all(&dir)?;

            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(slot as u64));
            let mut layers = Vec::with_capacity(self.kinds.len());
            for (index, (&kind, w)) in self.kinds.iter().zip(self.layers.windows(2)).enumerate() {
                let layer = random_layer(&mut rng, kind, w[0], w[1]);

                let on_disk = match self.layout {
                    WeightLayout::OutIn => layer.weights.clone(),
                    WeightLayout::InOut => transpose(&layer.weights, w[1], w[0]),
                };
                write_f32_file(&dir.join(weight_file_name(index, w[0], w[1])), &on_disk)?;
                write_f32_file(&dir.join(bias_file_name(index, w[1])), &layer.bias)?;
                layers.push(layer);
            }
            slots.push(layers);
        }

        fs::write(root.join("0").join(SETTING_FILE), setting.to_yaml()?)?;
        tracing::debug!("wrote fixture {:?} to {}", self.layers, root.display());

        Ok(WrittenFixture {
            temp: None,
            root: root.to_path_buf(),
            setting,
            slots,
        })
    }
}

fn random_layer(rng: &mut StdRng, kind: LayerKind, in_features: usize, out_features: usize) -> FixtureLayer {
    let scale = 1.0 / (in_features as f32).sqrt();
    FixtureLayer {
        kind,
        in_features,
        out_features,
        weights: (0..in_features * out_features)
            .map(|_| rng.gen_range(-scale..scale))
            .collect(),
        bias: (0..out_features).map(|_| rng.gen_range(-0.5..0.5)).collect(),
    }
}

/// A fixture on disk plus the parameters written for every slot
#[derive(Debug)]
pub struct WrittenFixture {
    temp: Option<TempDir>,
    root: PathBuf,
    pub setting: ModelSetting,
    pub slots: Vec<Vec<FixtureLayer>>,
}

impl WrittenFixture {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn slot(&self, slot: usize) -> Result<&[FixtureLayer]> {
        self.slots
            .get(slot)
            .map(Vec::as_slice)
            .ok_or_else(|| HarnessError::InvalidInput(format!("no slot {}", slot)))
    }

    pub fn reference(&self, slot: usize) -> Result<PlaintextReference> {
        Ok(PlaintextReference::new(self.slot(slot)?.to_vec()))
    }

    /// Path of one written parameter file
    pub fn weight_path(&self, slot: usize, layer: usize) -> Result<PathBuf> {
        let l = self
            .slot(slot)?
            .get(layer)
            .ok_or_else(|| HarnessError::InvalidInput(format!("no layer {}", layer)))?;
        Ok(self
            .root
            .join(slot.to_string())
            .join(weight_file_name(layer, l.in_features, l.out_features)))
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// Seeded inputs in `[-2, 2)`
pub fn random_inputs(seed: u64, len: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-2.0..2.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use surrogate_model::read_f32_file;

    #[test]
    fn test_fixture_files_exist() {
        let fixture = ModelFixture::new(&[4, 3, 2], &[LayerKind::Linear, LayerKind::LinearGelu])
            .write_temp()
            .unwrap();
        assert!(fixture.is_temporary());
        assert!(fixture.path().join("0").join(SETTING_FILE).is_file());
        for slot in 0..NUM_SLOTS {
            let dir = fixture.path().join(slot.to_string());
            assert!(dir.join("linear_0_weights_rowmajor_4_3.data").is_file());
            assert!(dir.join("linear_1_bias_2.data").is_file());
        }
    }

    #[test]
    fn test_slots_get_distinct_parameters() {
        let fixture = ModelFixture::new(&[4, 3], &[LayerKind::Linear]).write_temp().unwrap();
        assert_ne!(fixture.slots[0][0].weights, fixture.slots[1][0].weights);
        assert_ne!(fixture.slots[1][0].weights, fixture.slots[2][0].weights);
    }

    #[test]
    fn test_in_out_layout_written_transposed() {
        let fixture = ModelFixture::new(&[3, 2], &[LayerKind::Linear])
            .with_layout(WeightLayout::InOut)
            .write_temp()
            .unwrap();
        let on_disk = read_f32_file(&fixture.weight_path(0, 0).unwrap(), 6).unwrap();
        let w = &fixture.slots[0][0].weights;
        for i in 0..3 {
            for o in 0..2 {
                assert_eq!(on_disk[i * 2 + o], w[o * 3 + i]);
            }
        }
    }
}
