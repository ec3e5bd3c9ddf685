//! Batched multi-slot inference
//!
//! The engine owns three models ("slots") with one shared width schedule.
//! Each call evaluates every non-empty slot over its samples in tiles of at
//! most `batch_size` rows. Layer outputs live in scratch buffers allocated
//! once at load (`batch_size × width` per layer), so the hot loop never
//! allocates. The last layer's tile is widened into the caller's output.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use surrogate_comm::Communicator;
use surrogate_core::{activation_for, Activation, Element, EngineConfig, TensorView, TensorViewMut};
use tracing::{error, info};

use crate::error::{ModelError, Result};
use crate::layer::Model;
use crate::loader::ModelLoader;
use crate::report::InferenceReport;

/// Models evaluated per call
pub const NUM_SLOTS: usize = 3;

/// Elements per rayon task when widening into the output
const WIDEN_CHUNK: usize = 4096;

/// One slot's work for [`InferenceEngine::infer`]
pub struct SlotBatch<'a, E, O> {
    /// `samples × input_dim` values, row-major; may be longer
    pub input: &'a [E],
    /// Resized to `samples × output_dim`; untouched when `samples == 0`
    pub output: &'a mut Vec<O>,
    pub samples: usize,
}

impl<'a, E, O> SlotBatch<'a, E, O> {
    pub fn new(input: &'a [E], output: &'a mut Vec<O>, samples: usize) -> Self {
        Self {
            input,
            output,
            samples,
        }
    }

    /// A slot with nothing to evaluate this call
    pub fn skip(output: &'a mut Vec<O>) -> Self {
        Self {
            input: &[],
            output,
            samples: 0,
        }
    }
}

pub struct InferenceEngine<E: Element> {
    config: EngineConfig,
    activation: Arc<dyn Activation<E>>,
    widths: Vec<usize>,
    slots: Vec<Model<E>>,
    scratch: Vec<Vec<E>>,
    flops_per_sample: f64,
    rank: usize,
}

impl<E: Element> InferenceEngine<E> {
    /// An engine without models; call [`load_models`](Self::load_models) next
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let activation = activation_for(config.gelu, config.gelu_block);
        Ok(Self {
            config,
            activation,
            widths: Vec::new(),
            slots: Vec::new(),
            scratch: Vec::new(),
            flops_per_sample: 0.0,
            rank: 0,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env())
    }

    /// An engine over already built models, as rank 0 of a one-rank job
    pub fn from_models(config: EngineConfig, models: Vec<Model<E>>) -> Result<Self> {
        let mut engine = Self::new(config)?;
        let widths = models.first().map(Model::widths).unwrap_or_default();
        engine.install(widths, models)?;
        Ok(engine)
    }

    /// Replace the activation backend of `LinearGELU` layers
    pub fn with_activation(mut self, activation: Arc<dyn Activation<E>>) -> Self {
        self.activation = activation;
        self
    }

    /// Collective: every rank of `comm` must call this with the same `dir`
    pub fn load_models<C>(&mut self, dir: impl AsRef<Path>, comm: &C) -> Result<()>
    where
        C: Communicator + ?Sized,
    {
        let loaded = ModelLoader::new(comm).load_all::<E>(dir.as_ref())?;
        self.rank = comm.rank();
        self.install(loaded.setting.layers, loaded.models)
    }

    /// [`load_models`](Self::load_models), terminating the job on failure
    pub fn load_models_or_abort<C>(&mut self, dir: impl AsRef<Path>, comm: &C)
    where
        C: Communicator + ?Sized,
    {
        if let Err(e) = self.load_models(dir, comm) {
            error!(rank = comm.rank(), "failed to load models: {}", e);
            comm.abort(1);
        }
    }

    fn install(&mut self, widths: Vec<usize>, slots: Vec<Model<E>>) -> Result<()> {
        if slots.len() != NUM_SLOTS {
            return Err(ModelError::InvalidSetting(format!(
                "{} models given, {} slots required",
                slots.len(),
                NUM_SLOTS
            )));
        }
        for (slot, model) in slots.iter().enumerate() {
            let got = model.widths();
            if got != widths {
                return Err(ModelError::ShapeMismatch {
                    name: format!("slot {}", slot),
                    expected: widths,
                    got,
                });
            }
        }

        let batch_size = self.config.batch_size;
        self.scratch = widths[1..]
            .iter()
            .map(|&w| vec![E::zero(); batch_size * w])
            .collect();
        self.flops_per_sample = widths
            .windows(2)
            .map(|w| 2.0 * w[0] as f64 * w[1] as f64)
            .sum();
        self.widths = widths;
        self.slots = slots;

        if self.rank == 0 {
            info!(
                "engine ready: widths {:?}, batch size {}, activation {}, {:.0} FLOP/sample",
                self.widths,
                batch_size,
                self.activation.name(),
                self.flops_per_sample
            );
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn activation_name(&self) -> &'static str {
        self.activation.name()
    }

    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn input_dim(&self) -> usize {
        self.widths.first().copied().unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.widths.last().copied().unwrap_or(0)
    }

    pub fn flops_per_sample(&self) -> f64 {
        self.flops_per_sample
    }

    pub fn slot(&self, slot: usize) -> Option<&Model<E>> {
        self.slots.get(slot)
    }

    /// Elements held by the scratch buffers
    pub fn scratch_elements(&self) -> usize {
        self.scratch.iter().map(Vec::len).sum()
    }

    /// Evaluate all three slots. Slots with `samples == 0` are skipped.
    ///
    /// Every batch is checked before any output is touched.
    pub fn infer<O>(&mut self, batches: [SlotBatch<'_, E, O>; NUM_SLOTS]) -> Result<InferenceReport>
    where
        O: From<E> + Copy + Send,
    {
        if !self.is_loaded() {
            return Err(ModelError::NotLoaded);
        }
        for (slot, batch) in batches.iter().enumerate() {
            self.check_input(slot, batch.input.len(), batch.samples)?;
        }

        let start = Instant::now();
        let mut samples = 0;
        for (slot, batch) in batches.into_iter().enumerate() {
            if batch.samples == 0 {
                continue;
            }
            self.run_slot(slot, batch.input, batch.samples, batch.output)?;
            samples += batch.samples;
        }

        let report = InferenceReport::new(
            samples,
            self.config.batch_size,
            start.elapsed(),
            self.flops_per_sample,
            self.config.peak_tflops_per_thread,
            rayon::current_num_threads(),
        );
        if self.rank == 0 {
            report.log();
        }
        Ok(report)
    }

    /// Evaluate a single slot
    pub fn forward_slot<O>(
        &mut self,
        slot: usize,
        input: &[E],
        samples: usize,
        output: &mut Vec<O>,
    ) -> Result<()>
    where
        O: From<E> + Copy + Send,
    {
        if !self.is_loaded() {
            return Err(ModelError::NotLoaded);
        }
        if slot >= NUM_SLOTS {
            return Err(ModelError::SlotOutOfRange { slot });
        }
        self.check_input(slot, input.len(), samples)?;
        if samples == 0 {
            return Ok(());
        }
        self.run_slot(slot, input, samples, output)
    }

    fn check_input(&self, slot: usize, len: usize, samples: usize) -> Result<()> {
        let needed = samples.saturating_mul(self.input_dim());
        if len < needed {
            return Err(ModelError::InputTooShort {
                slot,
                needed,
                got: len,
            });
        }
        Ok(())
    }

    fn run_slot<O>(&mut self, slot: usize, input: &[E], samples: usize, output: &mut Vec<O>) -> Result<()>
    where
        O: From<E> + Copy + Send,
    {
        let batch_size = self.config.batch_size;
        let widths = &self.widths;
        let model = &self.slots[slot];
        let scratch = &mut self.scratch;
        let activation = self.activation.as_ref();

        let in_dim = widths[0];
        let out_dim = widths[widths.len() - 1];
        let last = scratch.len() - 1;

        output.clear();
        output.resize(samples * out_dim, O::from(E::zero()));

        let mut start = 0;
        while start < samples {
            let rows = batch_size.min(samples - start);
            let tile = &input[start * in_dim..(start + rows) * in_dim];

            for (i, layer) in model.layers().iter().enumerate() {
                let (done, rest) = scratch.split_at_mut(i);
                let src = if i == 0 { tile } else { done[i - 1].as_slice() };
                let x = TensorView::new(rows, widths[i], src)?;
                let mut y = TensorViewMut::new(rows, widths[i + 1], rest[0].as_mut_slice())?;
                layer.forward(&x, &mut y, activation)?;
            }

            let result = &scratch[last][..rows * out_dim];
            output[start * out_dim..(start + rows) * out_dim]
                .par_chunks_mut(WIDEN_CHUNK)
                .zip(result.par_chunks(WIDEN_CHUNK))
                .for_each(|(dst, src)| {
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d = O::from(*s);
                    }
                });

            start += rows;
        }
        Ok(())
    }
}
