//! Multi-process transport: a star of TCP connections around rank 0
//!
//! Rank 0 listens, every other rank connects and introduces itself with a
//! hello frame. Collectives are routed through rank 0:
//! - broadcast from rank 0: one frame to every peer
//! - broadcast from rank r > 0: r sends to rank 0, which forwards to the rest
//! - barrier: every peer checks in with rank 0, rank 0 releases them all
//!
//! An abort frame received while waiting turns into [`CommError::PeerAborted`]
//! so a failure on one rank reaches every rank instead of deadlocking it.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crate::communicator::{check_root, Communicator};
use crate::error::{CommError, Result};
use crate::frame::{Frame, FrameKind};

pub const ENV_RANK: &str = "SURROGATE_RANK";
pub const ENV_WORLD_SIZE: &str = "SURROGATE_WORLD_SIZE";
pub const ENV_ROOT_ADDR: &str = "SURROGATE_ROOT_ADDR";

const CONNECT_ATTEMPTS: usize = 100;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

enum Links {
    /// Rank 0: one stream per peer, index = rank - 1
    Root { peers: Vec<TcpStream> },
    /// Rank > 0: the stream to rank 0
    Leaf { root: TcpStream },
}

/// Rank 0 before the group is complete
pub struct TcpRoot {
    listener: TcpListener,
    size: usize,
}

impl TcpRoot {
    pub fn bind<A: ToSocketAddrs>(addr: A, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(CommError::RankOutOfRange { rank: 0, size });
        }
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, size })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait until every other rank connected
    pub fn accept(self) -> Result<TcpCommunicator> {
        let size = self.size;
        let mut slots: Vec<Option<TcpStream>> = (1..size).map(|_| None).collect();

        for _ in 1..size {
            let (stream, peer_addr) = self.listener.accept()?;
            stream.set_nodelay(true)?;

            let hello = recv_frame(&stream, FrameKind::Hello)?;
            let rank = hello
                .rank()
                .ok_or_else(|| CommError::Handshake(format!("malformed hello from {}", peer_addr)))?;
            if rank == 0 || rank >= size {
                return Err(CommError::RankOutOfRange { rank, size });
            }

            let slot = &mut slots[rank - 1];
            if slot.is_some() {
                return Err(CommError::Handshake(format!("rank {} connected twice", rank)));
            }
            tracing::debug!("rank {} joined from {}", rank, peer_addr);
            *slot = Some(stream);
        }

        // Exactly size - 1 distinct ranks in 1..size were accepted
        let peers: Vec<TcpStream> = slots.into_iter().flatten().collect();
        tracing::info!("communicator ready: {} ranks", size);

        Ok(TcpCommunicator {
            rank: 0,
            size,
            links: Links::Root { peers },
        })
    }
}

/// One rank of a TCP-connected job
pub struct TcpCommunicator {
    rank: usize,
    size: usize,
    links: Links,
}

impl TcpCommunicator {
    /// Join the job described by `SURROGATE_RANK`, `SURROGATE_WORLD_SIZE`
    /// and `SURROGATE_ROOT_ADDR`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key).ok_or_else(|| CommError::NotInitialized(format!("{} is not set", key)))
        };
        let number = |key: &str| -> Result<usize> {
            let raw = var(key)?;
            raw.trim().parse().map_err(|_| {
                CommError::NotInitialized(format!("{}={:?} is not an integer", key, raw))
            })
        };

        let rank = number(ENV_RANK)?;
        let size = number(ENV_WORLD_SIZE)?;
        let addr = var(ENV_ROOT_ADDR)?;

        if rank >= size {
            return Err(CommError::RankOutOfRange { rank, size });
        }
        if rank == 0 {
            TcpRoot::bind(addr.as_str(), size)?.accept()
        } else {
            Self::connect(rank, size, addr.as_str())
        }
    }

    /// Connect rank `rank` (> 0) to the root, retrying while it starts up
    pub fn connect<A: ToSocketAddrs>(rank: usize, size: usize, addr: A) -> Result<Self> {
        if rank == 0 || rank >= size {
            return Err(CommError::RankOutOfRange { rank, size });
        }

        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(&addr) {
                Ok(stream) => break stream,
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    tracing::debug!("rank {} connect attempt {} failed: {}", rank, attempt, e);
                    attempt += 1;
                    thread::sleep(CONNECT_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        };
        stream.set_nodelay(true)?;
        send_frame(&stream, &Frame::hello(rank))?;

        Ok(Self {
            rank,
            size,
            links: Links::Leaf { root: stream },
        })
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<()> {
        check_root(root, self.size)?;

        match &self.links {
            Links::Root { peers } => {
                if root == 0 {
                    let bytes = Frame::new(FrameKind::Broadcast, buf.to_vec()).encode()?;
                    for peer in peers {
                        (&*peer).write_all(&bytes)?;
                    }
                    Ok(())
                } else {
                    let frame = recv_frame(&peers[root - 1], FrameKind::Broadcast)?;
                    let bytes = frame.encode()?;
                    for (i, peer) in peers.iter().enumerate() {
                        if i + 1 != root {
                            (&*peer).write_all(&bytes)?;
                        }
                    }
                    copy_payload(buf, &frame.payload)
                }
            }
            Links::Leaf { root: stream } => {
                if self.rank == root {
                    send_frame(stream, &Frame::new(FrameKind::Broadcast, buf.to_vec()))
                } else {
                    let frame = recv_frame(stream, FrameKind::Broadcast)?;
                    copy_payload(buf, &frame.payload)
                }
            }
        }
    }

    fn barrier(&self) -> Result<()> {
        match &self.links {
            Links::Root { peers } => {
                for peer in peers {
                    recv_frame(peer, FrameKind::Barrier)?;
                }
                let bytes = Frame::barrier().encode()?;
                for peer in peers {
                    (&*peer).write_all(&bytes)?;
                }
                Ok(())
            }
            Links::Leaf { root } => {
                send_frame(root, &Frame::barrier())?;
                recv_frame(root, FrameKind::Barrier).map(|_| ())
            }
        }
    }

    fn abort(&self, code: i32) -> ! {
        tracing::error!(rank = self.rank, "aborting job with code {}", code);
        let frame = Frame::abort(self.rank);
        let streams: Vec<&TcpStream> = match &self.links {
            Links::Root { peers } => peers.iter().collect(),
            Links::Leaf { root } => vec![root],
        };
        for stream in streams {
            // Peers may already be gone
            let _ = send_frame(stream, &frame);
        }
        std::process::exit(code)
    }
}

fn send_frame(stream: &TcpStream, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    let mut writer = stream;
    writer.write_all(&bytes)?;
    Ok(())
}

fn recv_frame(stream: &TcpStream, expected: FrameKind) -> Result<Frame> {
    let frame = Frame::read_from(stream)?;
    if frame.kind == FrameKind::Abort {
        return Err(CommError::PeerAborted(frame.rank().unwrap_or(usize::MAX)));
    }
    if frame.kind != expected {
        return Err(CommError::UnexpectedFrame {
            expected: expected.name(),
            got: frame.kind.name(),
        });
    }
    Ok(frame)
}

fn copy_payload(buf: &mut [u8], payload: &[u8]) -> Result<()> {
    if buf.len() != payload.len() {
        return Err(CommError::LengthMismatch {
            local: buf.len(),
            received: payload.len(),
        });
    }
    buf.copy_from_slice(payload);
    Ok(())
}
