//! Engine configuration
//!
//! Everything here can be overridden from the environment so a host
//! simulation can tune the engine without code changes.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::kernel::GELU_BLOCK_LEN;

/// Default number of samples per batch tile
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Theoretical peak of one hardware thread, in TFLOP/s (node peak / cores * 2)
pub const DEFAULT_PEAK_TFLOPS_PER_THREAD: f64 = 3.3792 / 48.0 * 2.0;

pub const ENV_BATCH_SIZE: &str = "DNN_BATCH_SIZE";
pub const ENV_GELU_BACKEND: &str = "DNN_GELU_BACKEND";
pub const ENV_GELU_BLOCK: &str = "DNN_GELU_BLOCK";
pub const ENV_PEAK_TFLOPS: &str = "DNN_PEAK_TFLOPS_PER_THREAD";

/// Which GELU implementation LinearGELU layers run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeluBackend {
    /// tanh replaced by a saturated exponential form
    #[default]
    Fast,
    /// Platform tanh
    Reference,
    /// Reference formula over staged fixed-size blocks (offload layout)
    Tiled,
}

impl GeluBackend {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "exp" => Some(Self::Fast),
            "reference" | "naive" | "tanh" => Some(Self::Reference),
            "tiled" | "ldm" | "offload" => Some(Self::Tiled),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Reference => "reference",
            Self::Tiled => "tiled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum samples per tile
    pub batch_size: usize,
    /// Activation backend for LinearGELU layers
    pub gelu: GeluBackend,
    /// Block length for the tiled backend
    pub gelu_block: usize,
    /// Peak used for the efficiency figure in performance reports
    pub peak_tflops_per_thread: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            gelu: GeluBackend::default(),
            gelu_block: GELU_BLOCK_LEN,
            peak_tflops_per_thread: DEFAULT_PEAK_TFLOPS_PER_THREAD,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.batch_size = n,
                _ => tracing::warn!(
                    "{}={:?} is not a positive integer, using {}",
                    ENV_BATCH_SIZE,
                    raw,
                    DEFAULT_BATCH_SIZE
                ),
            }
        }

        if let Some(raw) = lookup(ENV_GELU_BACKEND) {
            match GeluBackend::from_name(&raw) {
                Some(backend) => config.gelu = backend,
                None => tracing::warn!(
                    "{}={:?} is not a known backend, using {}",
                    ENV_GELU_BACKEND,
                    raw,
                    config.gelu.name()
                ),
            }
        }

        if let Some(raw) = lookup(ENV_GELU_BLOCK) {
            if let Ok(n) = raw.trim().parse::<usize>() {
                if n > 0 {
                    config.gelu_block = n;
                }
            }
        }

        if let Some(raw) = lookup(ENV_PEAK_TFLOPS) {
            if let Ok(peak) = raw.trim().parse::<f64>() {
                if peak > 0.0 {
                    config.peak_tflops_per_thread = peak;
                }
            }
        }

        config
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_gelu(mut self, gelu: GeluBackend) -> Self {
        self.gelu = gelu;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CoreError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.gelu_block == 0 {
            return Err(CoreError::InvalidConfig("gelu_block must be positive".into()));
        }
        if !(self.peak_tflops_per_thread > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "peak_tflops_per_thread must be positive, got {}",
                self.peak_tflops_per_thread
            )));
        }
        Ok(())
    }
}
