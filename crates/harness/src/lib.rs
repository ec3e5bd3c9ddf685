//! Surrogate Test Harness
//!
//! Plaintext reference evaluation and on-disk model fixtures used to
//! validate the batched, distributed engine.

mod error;
mod fixtures;
mod reference;

pub use error::{HarnessError, Result};
pub use fixtures::{random_inputs, FixtureLayer, ModelFixture, WrittenFixture};
pub use reference::{max_abs_diff, verify_close, PlaintextReference};
