//! The collective communication seam

use crate::error::{CommError, Result};

/// A participant in a group of processes that perform collectives together.
///
/// Every collective blocks until all participants joined it. There is no
/// timeout: a participant that never calls in stalls the whole group.
pub trait Communicator: Send {
    /// This participant's rank, `0..size()`
    fn rank(&self) -> usize;

    /// Number of participants
    fn size(&self) -> usize;

    /// Copy `buf` from `root` into `buf` on every other participant.
    ///
    /// All participants must pass buffers of the same length.
    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<()>;

    /// Block until every participant reached the barrier
    fn barrier(&self) -> Result<()>;

    /// Terminate the whole job after a fatal error
    fn abort(&self, code: i32) -> !;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Broadcast a variable-length buffer: first its length, then its bytes.
    ///
    /// Non-root participants have `data` replaced by the root's contents.
    fn broadcast_bytes(&self, root: usize, data: &mut Vec<u8>) -> Result<()> {
        let mut len = (data.len() as u64).to_le_bytes();
        self.broadcast(root, &mut len)?;

        if self.rank() != root {
            let n = usize::try_from(u64::from_le_bytes(len)).map_err(|_| {
                CommError::LengthMismatch {
                    local: data.len(),
                    received: usize::MAX,
                }
            })?;
            data.clear();
            data.resize(n, 0);
        }

        self.broadcast(root, data)
    }
}

pub(crate) fn check_root(root: usize, size: usize) -> Result<()> {
    if root >= size {
        return Err(CommError::RankOutOfRange { rank: root, size });
    }
    Ok(())
}

/// The only participant of a one-process job
#[derive(Debug, Clone, Copy, Default)]
pub struct SoloCommunicator;

impl Communicator for SoloCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, root: usize, _buf: &mut [u8]) -> Result<()> {
        check_root(root, 1)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        tracing::error!("aborting job with code {}", code);
        std::process::exit(code)
    }
}
