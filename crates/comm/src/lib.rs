//! Surrogate Comm - collective operations across participating processes
//!
//! Model loading is a collective: one root reads files, every participant
//! receives byte-identical copies. This crate provides the [`Communicator`]
//! seam and three implementations:
//! - [`SoloCommunicator`]: a single process, every collective is local
//! - [`ThreadGroup`]: N participants simulated by threads of one process
//! - [`TcpCommunicator`]: N processes joined in a star around rank 0, with
//!   CRC-checked frames

mod communicator;
mod error;
mod frame;
mod local;
mod tcp;

pub use communicator::{Communicator, SoloCommunicator};
pub use error::{CommError, Result};
pub use frame::{Frame, FrameKind};
pub use local::{ThreadCommunicator, ThreadGroup};
pub use tcp::{TcpCommunicator, TcpRoot, ENV_RANK, ENV_ROOT_ADDR, ENV_WORLD_SIZE};
