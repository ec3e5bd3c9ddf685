//! Collective model loading
//!
//! Only the root rank touches the filesystem. It reads `setting.yaml` from
//! slot directory `0`, then the weight and bias files of slots `0`, `1` and
//! `2`, widens every value to the working precision and broadcasts it. All
//! other ranks allocate receive buffers from the broadcast setting.
//!
//! Before each broadcast that depends on a file read, the root broadcasts a
//! one-byte status. A failed read on the root therefore fails the load on
//! every rank with the same sequence of collectives.

use std::fs;
use std::path::{Path, PathBuf};

use surrogate_comm::Communicator;
use surrogate_core::Element;
use tracing::{debug, error, info};

use crate::engine::NUM_SLOTS;
use crate::error::{ModelError, Result};
use crate::layer::{Layer, LayerKind, Linear, Model};
use crate::setting::{ModelSetting, WeightLayout, SETTING_FILE};
use crate::weights::{bias_file_name, read_f32_file, transpose, weight_file_name};

const STATUS_OK: u8 = 0;
const STATUS_FAILED: u8 = 1;

/// Setting plus the three slot models, identical on every rank
#[derive(Debug, Clone)]
pub struct LoadedModels<E> {
    pub setting: ModelSetting,
    pub models: Vec<Model<E>>,
}

pub struct ModelLoader<'c, C: ?Sized> {
    comm: &'c C,
    root: usize,
}

impl<'c, C: Communicator + ?Sized> ModelLoader<'c, C> {
    pub fn new(comm: &'c C) -> Self {
        Self { comm, root: 0 }
    }

    fn is_root(&self) -> bool {
        self.comm.rank() == self.root
    }

    /// Load the setting and all three slots below `dir`
    pub fn load_all<E: Element>(&self, dir: &Path) -> Result<LoadedModels<E>> {
        let setting = self.load_setting(dir)?;
        let kinds = setting.validate()?;

        let models = (0..NUM_SLOTS)
            .map(|slot| self.load_slot(&setting, &kinds, &slot_dir(dir, slot)))
            .collect::<Result<Vec<_>>>()?;

        if self.is_root() {
            info!(
                "loaded {} models from {}: widths {:?}, {} ranks, {}",
                NUM_SLOTS,
                dir.display(),
                setting.layers,
                self.comm.size(),
                E::DTYPE.name()
            );
        }
        Ok(LoadedModels { setting, models })
    }

    /// Read `dir/0/setting.yaml` on the root and share it with every rank
    pub fn load_setting(&self, dir: &Path) -> Result<ModelSetting> {
        let path = slot_dir(dir, 0).join(SETTING_FILE);
        let read = self.root_step(|| {
            fs::read(&path).map_err(|source| ModelError::SettingNotFound {
                path: path.display().to_string(),
                source,
            })
        })?;

        let mut bytes = read.unwrap_or_default();
        self.comm.broadcast_bytes(self.root, &mut bytes)?;
        debug!(rank = self.comm.rank(), "received setting ({} bytes)", bytes.len());

        // Every rank parses the same document and fails the same way
        ModelSetting::from_yaml(&bytes)
    }

    /// Load one slot's layers; `kinds` comes from [`ModelSetting::validate`]
    pub fn load_slot<E: Element>(
        &self,
        setting: &ModelSetting,
        kinds: &[LayerKind],
        slot_dir: &Path,
    ) -> Result<Model<E>> {
        let mut layers = Vec::with_capacity(kinds.len());

        for (index, (entry, kind)) in setting.model.iter().zip(kinds).enumerate() {
            let (in_features, out_features) = (entry.layer.in_features, entry.layer.out_features);

            let read = self.root_step(|| {
                read_layer(slot_dir, index, in_features, out_features, setting.weight_layout)
            })?;
            let mut params = read.unwrap_or_else(|| Linear::zeros(in_features, out_features));

            self.broadcast_elements(params.weights_mut())?;
            self.broadcast_elements(params.bias_mut())?;
            debug!(
                rank = self.comm.rank(),
                "{} layer {} ({}): {}x{}",
                slot_dir.display(),
                index,
                kind.name(),
                in_features,
                out_features
            );

            layers.push(Layer::new(*kind, params));
        }

        Model::new(layers)
    }

    /// Run `read` on the root and share whether it succeeded.
    ///
    /// Returns `Some` on the root, `None` elsewhere, or the root's failure.
    fn root_step<T>(&self, read: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
        if self.is_root() {
            let outcome = read();
            let mut status = [if outcome.is_ok() { STATUS_OK } else { STATUS_FAILED }];
            if let Err(e) = &outcome {
                error!("model load failed: {}", e);
            }
            self.comm.broadcast(self.root, &mut status)?;
            outcome.map(Some)
        } else {
            let mut status = [STATUS_OK];
            self.comm.broadcast(self.root, &mut status)?;
            if status[0] != STATUS_OK {
                return Err(ModelError::RootFailed { root: self.root });
            }
            Ok(None)
        }
    }

    fn broadcast_elements<E: Element>(&self, values: &mut [E]) -> Result<()> {
        let mut bytes = vec![0u8; values.len() * E::size_bytes()];
        if self.is_root() {
            E::write_le(values, &mut bytes);
        }
        self.comm.broadcast(self.root, &mut bytes)?;
        if !self.is_root() {
            E::read_le(&bytes, values);
        }
        Ok(())
    }
}

fn slot_dir(dir: &Path, slot: usize) -> PathBuf {
    dir.join(slot.to_string())
}

/// Read one layer's files and widen them, weights as `out × in`
fn read_layer<E: Element>(
    dir: &Path,
    index: usize,
    in_features: usize,
    out_features: usize,
    layout: WeightLayout,
) -> Result<Linear<E>> {
    let weight_path = dir.join(weight_file_name(index, in_features, out_features));
    let mut weights = read_f32_file(&weight_path, in_features * out_features)?;
    if layout == WeightLayout::InOut {
        weights = transpose(&weights, in_features, out_features);
    }
    let bias = read_f32_file(&dir.join(bias_file_name(index, out_features)), out_features)?;

    Linear::new(
        in_features,
        out_features,
        weights.into_iter().map(E::from_f32).collect(),
        bias.into_iter().map(E::from_f32).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InferenceEngine;
    use crate::weights::write_f32_file;
    use surrogate_comm::{SoloCommunicator, ThreadGroup};
    use surrogate_core::EngineConfig;

    fn write_model(root: &Path, layout: WeightLayout) -> ModelSetting {
        let setting =
            ModelSetting::from_schedule(&[3, 2], &[LayerKind::Linear]).unwrap().with_weight_layout(layout);
        for slot in 0..NUM_SLOTS {
            let dir = slot_dir(root, slot);
            fs::create_dir_all(&dir).unwrap();
            let base = slot as f32 * 10.0;
            let weights: Vec<f32> = (0..6).map(|i| base + i as f32).collect();
            write_f32_file(&dir.join(weight_file_name(0, 3, 2)), &weights).unwrap();
            write_f32_file(&dir.join(bias_file_name(0, 2)), &[base + 0.5, base - 0.5]).unwrap();
        }
        fs::write(slot_dir(root, 0).join(SETTING_FILE), setting.to_yaml().unwrap()).unwrap();
        setting
    }

    #[test]
    fn test_solo_load_reads_each_slot() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), WeightLayout::OutIn);

        let loaded = ModelLoader::new(&SoloCommunicator).load_all::<f32>(dir.path()).unwrap();
        assert_eq!(loaded.models.len(), NUM_SLOTS);
        let slot2 = loaded.models[2].layers()[0].params();
        assert_eq!(slot2.weights(), &[20.0, 21.0, 22.0, 23.0, 24.0, 25.0]);
        assert_eq!(slot2.bias(), &[20.5, 19.5]);
    }

    #[test]
    fn test_setting_without_layout_reads_in_out_files() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "\
layers: [2, 3]
model:
  - layer:
      type: Linear
      in_features: 2
      out_features: 3
";
        for slot in 0..NUM_SLOTS {
            let slot_path = slot_dir(dir.path(), slot);
            fs::create_dir_all(&slot_path).unwrap();
            // rows are input features: [[1, 2, 3], [4, 5, 6]]
            write_f32_file(
                &slot_path.join(weight_file_name(0, 2, 3)),
                &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            )
            .unwrap();
            write_f32_file(&slot_path.join(bias_file_name(0, 3)), &[0.0; 3]).unwrap();
        }
        fs::write(slot_dir(dir.path(), 0).join(SETTING_FILE), yaml).unwrap();

        let mut engine = InferenceEngine::<f32>::new(EngineConfig::default()).unwrap();
        engine.load_models(dir.path(), &SoloCommunicator).unwrap();
        let mut out: Vec<f64> = Vec::new();
        engine.forward_slot(0, &[1.0, 10.0], 1, &mut out).unwrap();

        // x · W with W read as in × out
        assert_eq!(out, vec![41.0, 52.0, 63.0]);
    }

    #[test]
    fn test_in_out_layout_is_transposed() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), WeightLayout::InOut);

        let loaded = ModelLoader::new(&SoloCommunicator).load_all::<f64>(dir.path()).unwrap();
        // file is 3 × 2 [[0,1],[2,3],[4,5]], stored as 2 × 3
        let params = loaded.models[0].layers()[0].params();
        assert_eq!(params.weights(), &[0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_ranks_receive_identical_parameters() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), WeightLayout::OutIn);
        let path = dir.path();

        let loaded = ThreadGroup::run(4, |comm| {
            ModelLoader::new(&comm).load_all::<f64>(path).unwrap()
        });
        for other in &loaded[1..] {
            assert_eq!(other.setting, loaded[0].setting);
            assert_eq!(other.models, loaded[0].models);
        }
    }

    #[test]
    fn test_missing_setting_fails_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();

        let outcomes = ThreadGroup::run(3, |comm| {
            ModelLoader::new(&comm).load_all::<f32>(path).map(|_| ())
        });
        assert!(matches!(outcomes[0], Err(ModelError::SettingNotFound { .. })));
        assert!(outcomes[1..]
            .iter()
            .all(|o| matches!(o, Err(ModelError::RootFailed { root: 0 }))));
    }

    #[test]
    fn test_short_weight_file_fails_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), WeightLayout::OutIn);
        write_f32_file(&slot_dir(dir.path(), 1).join(weight_file_name(0, 3, 2)), &[1.0; 5]).unwrap();
        let path = dir.path();

        let outcomes = ThreadGroup::run(2, |comm| {
            ModelLoader::new(&comm).load_all::<f32>(path).map(|_| ())
        });
        assert!(matches!(outcomes[0], Err(ModelError::WeightFileSize { .. })));
        assert!(matches!(outcomes[1], Err(ModelError::RootFailed { root: 0 })));
    }
}
