//! GELU activation kernels
//!
//! Three interchangeable forms of `0.5·x·(1 + tanh(√(2/π)·(x + 0.044715·x³)))`:
//! - **reference**: platform `tanh`, kept for verification
//! - **fast**: `tanh(z) = 1 − 2/(e^{2z}+1)`, saturated to ±1 for |z| > 8
//! - **tiled**: the reference formula applied block by block through a
//!   worker-local staging buffer, the layout an accelerator offload uses
//!
//! All forms are parallel over elements and write every element exactly once.

use std::f64::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::GeluBackend;
use crate::element::Element;

/// Elements staged per block by the tiled backend
pub const GELU_BLOCK_LEN: usize = 8192;

/// Elements per rayon task for the host kernels
const PAR_CHUNK: usize = 4096;

/// |z| beyond which the fast tanh returns exactly ±1
const TANH_SATURATION: f64 = 8.0;

const GELU_CUBIC: f64 = 0.044715;

/// Formula constants in the working precision, built once per kernel call
#[derive(Debug, Clone, Copy)]
struct GeluConsts<E> {
    half: E,
    one: E,
    two: E,
    sqrt_2_over_pi: E,
    cubic: E,
    limit: E,
}

impl<E: Element> GeluConsts<E> {
    fn new() -> Self {
        Self {
            half: E::from_f64(0.5),
            one: E::one(),
            two: E::from_f64(2.0),
            sqrt_2_over_pi: E::from_f64(2.0 / PI).sqrt(),
            cubic: E::from_f64(GELU_CUBIC),
            limit: E::from_f64(TANH_SATURATION),
        }
    }

    #[inline]
    fn reference(&self, x: E) -> E {
        let inner = self.sqrt_2_over_pi * (x + self.cubic * x.powi(3));
        self.half * x * (self.one + inner.tanh())
    }

    #[inline]
    fn tanh_exp(&self, z: E) -> E {
        if z > self.limit {
            return self.one;
        }
        if z < -self.limit {
            return -self.one;
        }
        self.one - self.two / ((self.two * z).exp() + self.one)
    }

    #[inline]
    fn fast(&self, x: E) -> E {
        let inner = self.sqrt_2_over_pi * (x + self.cubic * x * x * x);
        self.half * x * (self.one + self.tanh_exp(inner))
    }
}

/// Reference GELU of a single value
pub fn gelu_reference_scalar<E: Element>(x: E) -> E {
    GeluConsts::new().reference(x)
}

/// Exponential tanh with saturation
pub fn tanh_exp<E: Element>(z: E) -> E {
    GeluConsts::new().tanh_exp(z)
}

/// Fast GELU of a single value
pub fn gelu_fast_scalar<E: Element>(x: E) -> E {
    GeluConsts::new().fast(x)
}

/// Reference GELU in place, parallel over elements
pub fn gelu_reference<E: Element>(data: &mut [E]) {
    let c = GeluConsts::<E>::new();
    data.par_chunks_mut(PAR_CHUNK).for_each(|chunk| {
        for v in chunk.iter_mut() {
            *v = c.reference(*v);
        }
    });
}

/// Fast GELU in place, parallel over elements
pub fn gelu_fast<E: Element>(data: &mut [E]) {
    let c = GeluConsts::<E>::new();
    data.par_chunks_mut(PAR_CHUNK).for_each(|chunk| {
        for v in chunk.iter_mut() {
            *v = c.fast(*v);
        }
    });
}

/// One-off block-staged reference GELU.
///
/// Allocates its staging buffers on every call; hold a [`TiledGelu`] to
/// reuse them.
pub fn gelu_tiled<E: Element>(data: &mut [E], block_len: usize) {
    TiledGelu::new(block_len).apply(data);
}

/// Elementwise activation applied in place after an affine layer.
///
/// Implement this to plug in an accelerator backend; the engine never assumes
/// which implementation runs.
pub trait Activation<E: Element>: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, data: &mut [E]);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGelu;

impl<E: Element> Activation<E> for ReferenceGelu {
    fn name(&self) -> &'static str {
        "gelu-reference"
    }

    fn apply(&self, data: &mut [E]) {
        gelu_reference(data);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FastGelu;

impl<E: Element> Activation<E> for FastGelu {
    fn name(&self) -> &'static str {
        "gelu-fast"
    }

    fn apply(&self, data: &mut [E]) {
        gelu_fast(data);
    }
}

/// Block-staged reference GELU.
///
/// Each block of at most `block_len` elements is copied into a staging buffer
/// owned by the worker running it, transformed there, and copied back.
/// Results are bit-identical to [`gelu_reference`]. The staging buffers are
/// allocated once, one per rayon worker plus one shared by outside callers.
#[derive(Debug)]
pub struct TiledGelu<E> {
    block_len: usize,
    stages: Vec<Mutex<Vec<E>>>,
}

impl<E: Element> TiledGelu<E> {
    pub fn new(block_len: usize) -> Self {
        let block_len = block_len.max(1);
        let stages = (0..=rayon::current_num_threads())
            .map(|_| Mutex::new(vec![E::zero(); block_len]))
            .collect();
        Self { block_len, stages }
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    fn stage(&self) -> &Mutex<Vec<E>> {
        let last = self.stages.len() - 1;
        let index = rayon::current_thread_index().map_or(last, |i| i.min(last));
        &self.stages[index]
    }

    #[cfg(test)]
    fn stage_addresses(&self) -> Vec<(usize, usize)> {
        self.stages
            .iter()
            .map(|s| {
                let stage = s.lock();
                (stage.as_ptr() as usize, stage.capacity())
            })
            .collect()
    }
}

impl<E: Element> Default for TiledGelu<E> {
    fn default() -> Self {
        Self::new(GELU_BLOCK_LEN)
    }
}

impl<E: Element> Activation<E> for TiledGelu<E> {
    fn name(&self) -> &'static str {
        "gelu-tiled"
    }

    fn apply(&self, data: &mut [E]) {
        let c = GeluConsts::<E>::new();
        data.par_chunks_mut(self.block_len).for_each(|block| {
            let mut stage = self.stage().lock();
            let local = &mut stage[..block.len()];
            local.copy_from_slice(block);
            for v in local.iter_mut() {
                *v = c.reference(*v);
            }
            block.copy_from_slice(local);
        });
    }
}

/// Build the built-in backend selected by configuration
pub fn activation_for<E: Element>(backend: GeluBackend, block_len: usize) -> Arc<dyn Activation<E>> {
    match backend {
        GeluBackend::Fast => Arc::new(FastGelu),
        GeluBackend::Reference => Arc::new(ReferenceGelu),
        GeluBackend::Tiled => Arc::new(TiledGelu::new(block_len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grid(lo: f32, hi: f32, step: f32) -> Vec<f32> {
        let n = ((hi - lo) / step).round() as usize;
        (0..=n).map(|i| lo + i as f32 * step).collect()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-5 * a.abs().max(b.abs()) + 1e-6
    }

    #[test]
    fn test_gelu_zero() {
        assert_eq!(gelu_reference_scalar(0.0f32), 0.0);
        assert_eq!(gelu_fast_scalar(0.0f32), 0.0);
        assert_eq!(gelu_fast_scalar(0.0f64), 0.0);
    }

    #[test]
    fn test_known_values() {
        // GELU(1) ≈ 0.841192, GELU(-1) ≈ -0.158808 (tanh approximation)
        assert!((gelu_reference_scalar(1.0f64) - 0.841_192).abs() < 1e-5);
        assert!((gelu_fast_scalar(-1.0f64) + 0.158_808).abs() < 1e-5);
    }

    #[test]
    fn test_tanh_exp_saturates_exactly() {
        assert_eq!(tanh_exp(8.0001f32), 1.0);
        assert_eq!(tanh_exp(-8.0001f32), -1.0);
        assert_eq!(tanh_exp(50.0f64), 1.0);
        assert!(tanh_exp(7.9f32) < 1.0);
        assert!(tanh_exp(0.5f64) - 0.5f64.tanh() < 1e-15);
    }

    #[test]
    fn test_fast_matches_reference_on_range() {
        for x in grid(-20.0, 20.0, 0.005) {
            let r = gelu_reference_scalar(x);
            let f = gelu_fast_scalar(x);
            assert!(close(r, f), "x={} reference={} fast={}", x, r, f);
        }
    }

    #[test]
    fn test_fast_matches_reference_around_saturation() {
        // z = 8 is reached near x ≈ 4.39 and x ≈ -4.39
        for x in grid(-4.6, -4.2, 0.0005).into_iter().chain(grid(4.2, 4.6, 0.0005)) {
            let r = gelu_reference_scalar(x);
            let f = gelu_fast_scalar(x);
            assert!(close(r, f), "x={} reference={} fast={}", x, r, f);
        }
    }

    #[test]
    fn test_monotone_on_positive_axis() {
        let xs = grid(0.0, 20.0, 0.001);
        for pair in xs.windows(2) {
            assert!(gelu_reference_scalar(pair[1]) >= gelu_reference_scalar(pair[0]));
            assert!(gelu_fast_scalar(pair[1]) >= gelu_fast_scalar(pair[0]));
        }
    }

    #[test]
    fn test_slice_kernels_match_scalar() {
        let input = grid(-10.0, 10.0, 0.001);

        let mut fast = input.clone();
        gelu_fast(&mut fast);
        let mut reference = input.clone();
        gelu_reference(&mut reference);

        for ((x, f), r) in input.iter().zip(&fast).zip(&reference) {
            assert_eq!(*f, gelu_fast_scalar(*x));
            assert_eq!(*r, gelu_reference_scalar(*x));
        }
    }

    #[test]
    fn test_tiled_is_bit_identical_to_reference() {
        // Length deliberately not a multiple of the block
        let input: Vec<f32> = (0..20_001).map(|i| (i as f32 - 10_000.0) * 1e-3).collect();
        let mut reference = input.clone();
        gelu_reference(&mut reference);

        for block in [1usize, 7, 1000, GELU_BLOCK_LEN, 50_000] {
            let mut tiled = input.clone();
            gelu_tiled(&mut tiled, block);
            let same = tiled
                .iter()
                .zip(&reference)
                .all(|(a, b)| a.to_bits() == b.to_bits());
            assert!(same, "block={}", block);
        }
    }

    #[test]
    fn test_tiled_reuses_its_staging_buffers() {
        let tiled = TiledGelu::<f32>::new(64);
        let before = tiled.stage_addresses();
        assert!(before.iter().all(|&(_, capacity)| capacity >= 64));

        let input = grid(-10.0, 10.0, 0.001);
        let mut reference = input.clone();
        gelu_reference(&mut reference);
        for _ in 0..3 {
            let mut data = input.clone();
            tiled.apply(&mut data);
            assert!(data.iter().zip(&reference).all(|(a, b)| a.to_bits() == b.to_bits()));
        }
        assert_eq!(tiled.stage_addresses(), before);
    }

    #[test]
    fn test_kernel_constants_match_scalar_path() {
        let c = GeluConsts::<f64>::new();
        assert_eq!(c.sqrt_2_over_pi, (2.0 / PI).sqrt());
        for x in [-9.0f64, -1.5, 0.25, 3.0, 12.0] {
            assert_eq!(c.reference(x).to_bits(), gelu_reference_scalar(x).to_bits());
            assert_eq!(c.fast(x).to_bits(), gelu_fast_scalar(x).to_bits());
        }
    }

    #[test]
    fn test_activation_for_selects_backend() {
        let act = activation_for::<f32>(GeluBackend::Tiled, 64);
        assert_eq!(act.name(), "gelu-tiled");
        let act = activation_for::<f64>(GeluBackend::Reference, 64);
        assert_eq!(act.name(), "gelu-reference");

        let mut data = vec![1.0f32, -1.0];
        activation_for::<f32>(GeluBackend::Fast, 64).apply(&mut data);
        assert_eq!(data[0], gelu_fast_scalar(1.0f32));
    }

    #[test]
    fn test_empty_slice_is_noop() {
        let mut empty: Vec<f32> = Vec::new();
        gelu_fast(&mut empty);
        gelu_tiled(&mut empty, GELU_BLOCK_LEN);
        assert!(empty.is_empty());
    }

    proptest! {
        #[test]
        fn prop_fast_agrees_with_reference_f64(x in -20.0f64..20.0) {
            let r = gelu_reference_scalar(x);
            let f = gelu_fast_scalar(x);
            // f64 saturation error is bounded by |x| * 2e^{-16}
            prop_assert!((r - f).abs() <= 1e-5 * r.abs().max(f.abs()) + 1e-6);
        }

        #[test]
        fn prop_gelu_bounded_by_identity(x in 0.0f32..50.0) {
            let y = gelu_fast_scalar(x);
            prop_assert!(y >= 0.0 && y <= x);
        }
    }
}
