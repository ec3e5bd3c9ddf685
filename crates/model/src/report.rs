//! Throughput report of one inference call

use std::time::Duration;

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InferenceReport {
    /// Samples evaluated across all slots
    pub samples: usize,
    pub batch_size: usize,
    pub seconds: f64,
    /// Achieved floating point operations per second
    pub flops: f64,
    pub tflops: f64,
    /// Achieved share of the configured peak, in percent
    pub peak_percent: f64,
    pub threads: usize,
}

impl InferenceReport {
    pub fn new(
        samples: usize,
        batch_size: usize,
        elapsed: Duration,
        flops_per_sample: f64,
        peak_tflops_per_thread: f64,
        threads: usize,
    ) -> Self {
        let seconds = elapsed.as_secs_f64();
        let flops = if seconds > 0.0 {
            flops_per_sample * samples as f64 / seconds
        } else {
            0.0
        };
        let tflops = flops / 1e12;
        let peak = peak_tflops_per_thread * threads as f64;
        let peak_percent = if peak > 0.0 { tflops / peak * 100.0 } else { 0.0 };

        Self {
            samples,
            batch_size,
            seconds,
            flops,
            tflops,
            peak_percent,
            threads,
        }
    }

    /// Emit the report at info level
    pub fn log(&self) {
        info!("DNN inference:");
        info!("  samples:    {}", self.samples);
        info!("  batch size: {}", self.batch_size);
        info!("  time:       {:.6} s", self.seconds);
        info!("  FLOPS:      {:.3e}", self.flops);
        info!("  TFLOPS:     {:.4}", self.tflops);
        info!("  peak:       {:.2}% of {} threads", self.peak_percent, self.threads);
    }
}
