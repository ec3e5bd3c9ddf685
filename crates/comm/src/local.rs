//! In-process participant groups
//!
//! Each participant runs on its own thread and owns a [`ThreadCommunicator`].
//! Broadcasts go through a shared staging buffer guarded by two barrier
//! phases: the root publishes, everyone copies, then the buffer is released.

use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;

use crate::communicator::{check_root, Communicator};
use crate::error::{CommError, Result};

struct Shared {
    size: usize,
    barrier: Barrier,
    slot: Mutex<Vec<u8>>,
}

/// One participant of a [`ThreadGroup`]
pub struct ThreadCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

/// Factory for simulated multi-participant jobs
pub struct ThreadGroup;

impl ThreadGroup {
    /// Create `size` connected participants, index == rank
    pub fn new(size: usize) -> Vec<ThreadCommunicator> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slot: Mutex::new(Vec::new()),
        });

        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run `f` once per participant on its own thread and collect the
    /// results in rank order. A panic on any participant is re-raised.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ThreadCommunicator) -> T + Sync,
    {
        let comms = Self::new(size);
        let f = &f;

        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(value) => value,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<()> {
        check_root(root, self.shared.size)?;

        if self.rank == root {
            let mut slot = self.shared.slot.lock();
            slot.clear();
            slot.extend_from_slice(buf);
        }
        self.shared.barrier.wait();

        let outcome = if self.rank == root {
            Ok(())
        } else {
            let slot = self.shared.slot.lock();
            if slot.len() == buf.len() {
                buf.copy_from_slice(&slot);
                Ok(())
            } else {
                Err(CommError::LengthMismatch {
                    local: buf.len(),
                    received: slot.len(),
                })
            }
        };

        // The root must not overwrite the slot before every reader copied it
        self.shared.barrier.wait();
        outcome
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn abort(&self, code: i32) -> ! {
        tracing::error!(rank = self.rank, "aborting job with code {}", code);
        std::process::exit(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_ranks() {
        let comms = ThreadGroup::new(4);
        let ranks: Vec<usize> = comms.iter().map(|c| c.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(comms.iter().all(|c| c.size() == 4));
    }

    #[test]
    fn test_broadcast_from_root() {
        let results = ThreadGroup::run(4, |comm| {
            let mut buf = if comm.is_root() {
                vec![1u8, 2, 3, 4]
            } else {
                vec![0u8; 4]
            };
            comm.broadcast(0, &mut buf).unwrap();
            buf
        });
        assert!(results.iter().all(|b| b == &[1, 2, 3, 4]));
    }

    #[test]
    fn test_broadcast_from_non_zero_root() {
        let results = ThreadGroup::run(3, |comm| {
            let mut buf = vec![comm.rank() as u8; 2];
            comm.broadcast(2, &mut buf).unwrap();
            buf
        });
        assert!(results.iter().all(|b| b == &[2, 2]));
    }

    #[test]
    fn test_broadcast_bytes_resizes_receivers() {
        let results = ThreadGroup::run(3, |comm| {
            let mut data = if comm.is_root() {
                b"model:\n  - layer".to_vec()
            } else {
                Vec::new()
            };
            comm.broadcast_bytes(0, &mut data).unwrap();
            data
        });
        assert!(results.iter().all(|d| d == b"model:\n  - layer"));
    }

    #[test]
    fn test_repeated_broadcasts_do_not_mix() {
        let results = ThreadGroup::run(4, |comm| {
            let mut seen = Vec::new();
            for round in 0..50u8 {
                let mut buf = [if comm.is_root() { round } else { 255 }];
                comm.broadcast(0, &mut buf).unwrap();
                seen.push(buf[0]);
            }
            seen
        });
        let expected: Vec<u8> = (0..50).collect();
        assert!(results.iter().all(|s| s == &expected));
    }

    #[test]
    fn test_length_mismatch_is_reported_without_deadlock() {
        let results = ThreadGroup::run(2, |comm| {
            let mut buf = vec![0u8; 3 + comm.rank()];
            comm.broadcast(0, &mut buf).map(|_| ())
        });
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(CommError::LengthMismatch { local: 4, received: 3 })
        ));
    }
}
