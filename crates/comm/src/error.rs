//! Communication error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("Distributed runtime is not initialized: {0}")]
    NotInitialized(String),

    #[error("Rank {rank} out of range for world of size {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("Broadcast length mismatch: local buffer {local} bytes, root sent {received}")]
    LengthMismatch { local: usize, received: usize },

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },

    #[error("Unknown frame kind: 0x{0:04X}")]
    UnknownFrameKind(u16),

    #[error("Unexpected frame: expected {expected}, got {got}")]
    UnexpectedFrame { expected: &'static str, got: &'static str },

    #[error("Payload CRC mismatch: expected 0x{expected:08X}, got 0x{got:08X}")]
    PayloadCrcMismatch { expected: u32, got: u32 },

    #[error("Peer rank {0} aborted the job")]
    PeerAborted(usize),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CommError>;
