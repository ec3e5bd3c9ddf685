//! Synthetic throughput benchmark
//!
//! Loads the three slot models from `SURROGATE_MODEL_DIR` (or writes a random
//! fixture when unset), then runs one `infer` call per round over all slots.
//!
//! Environment:
//! - `SURROGATE_MODEL_DIR`: model directory with `0/setting.yaml`
//! - `SURROGATE_BENCH_LAYERS`: fixture width schedule, default `64,256,256,32`
//! - `SURROGATE_BENCH_SAMPLES`: samples per slot, default 100000
//! - `SURROGATE_BENCH_ROUNDS`: default 3
//! - `SURROGATE_WORLD_SIZE` etc.: join a TCP job instead of running alone
//! - `DNN_*`: engine configuration

use std::env;
use std::path::PathBuf;

use surrogate_comm::{Communicator, SoloCommunicator, TcpCommunicator, ENV_WORLD_SIZE};
use surrogate_harness::{random_inputs, ModelFixture};
use surrogate_model::{InferenceEngine, LayerKind, SlotBatch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LAYERS: &[usize] = &[64, 256, 256, 32];
const DEFAULT_SAMPLES: usize = 100_000;
const DEFAULT_ROUNDS: usize = 3;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_layers() -> Vec<usize> {
    env::var("SURROGATE_BENCH_LAYERS")
        .ok()
        .and_then(|v| {
            v.split(',')
                .map(|w| w.trim().parse().ok())
                .collect::<Option<Vec<usize>>>()
        })
        .filter(|l| l.len() >= 2)
        .unwrap_or_else(|| DEFAULT_LAYERS.to_vec())
}

fn run<C: Communicator>(comm: &C) -> anyhow::Result<()> {
    // Kept alive until the models are loaded
    let mut fixture = None;
    let model_dir = match env::var("SURROGATE_MODEL_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let layers = env_layers();
            // Hidden layers use GELU, the output layer stays linear
            let mut kinds = vec![LayerKind::LinearGelu; layers.len() - 2];
            kinds.push(LayerKind::Linear);
            let written = ModelFixture::new(&layers, &kinds).write_temp()?;
            let dir = written.path().to_path_buf();
            fixture = Some(written);
            dir
        }
    };
    if comm.is_root() {
        tracing::info!("model directory: {}", model_dir.display());
    }

    let mut engine = InferenceEngine::<f32>::from_env()?;
    engine.load_models_or_abort(&model_dir, comm);
    drop(fixture);

    let samples = env_usize("SURROGATE_BENCH_SAMPLES", DEFAULT_SAMPLES);
    let rounds = env_usize("SURROGATE_BENCH_ROUNDS", DEFAULT_ROUNDS);
    let inputs: Vec<Vec<f32>> = (0..3)
        .map(|slot| random_inputs(slot + comm.rank() as u64 * 3, samples * engine.input_dim()))
        .collect();
    let mut outputs: [Vec<f64>; 3] = Default::default();

    for round in 0..rounds {
        let [o0, o1, o2] = &mut outputs;
        let report = engine.infer([
            SlotBatch::new(&inputs[0], o0, samples),
            SlotBatch::new(&inputs[1], o1, samples),
            SlotBatch::new(&inputs[2], o2, samples),
        ])?;
        if comm.is_root() {
            tracing::info!(round, "{:.4} TFLOPS, {:.2}% of peak", report.tflops, report.peak_percent);
        }
    }

    comm.barrier()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env::var(ENV_WORLD_SIZE).is_ok() {
        let comm = TcpCommunicator::from_env()?;
        run(&comm)
    } else {
        run(&SoloCommunicator)
    }
}
