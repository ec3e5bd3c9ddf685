//! Frame encoding/decoding for the TCP transport
//!
//! Layout (little-endian):
//! magic(4) + version(2) + kind(2) + payload_len(8) + payload_crc(4) + payload

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CommError, Result};

pub const MAGIC: [u8; 4] = *b"SGCM";
pub const PROTOCOL_VERSION: u16 = 1;

/// Frame preamble size (before payload)
pub const PREAMBLE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Sent once by every non-root rank after connecting; payload = rank (u32)
    Hello,
    Broadcast,
    Barrier,
    Abort,
}

impl FrameKind {
    pub fn to_u16(self) -> u16 {
        match self {
            FrameKind::Hello => 0x0001,
            FrameKind::Broadcast => 0x0002,
            FrameKind::Barrier => 0x0003,
            FrameKind::Abort => 0x00FF,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0001 => Some(FrameKind::Hello),
            0x0002 => Some(FrameKind::Broadcast),
            0x0003 => Some(FrameKind::Barrier),
            0x00FF => Some(FrameKind::Abort),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Hello => "hello",
            FrameKind::Broadcast => "broadcast",
            FrameKind::Barrier => "barrier",
            FrameKind::Abort => "abort",
        }
    }
}

/// A complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn hello(rank: usize) -> Self {
        Self::new(FrameKind::Hello, (rank as u32).to_le_bytes().to_vec())
    }

    pub fn barrier() -> Self {
        Self::new(FrameKind::Barrier, Vec::new())
    }

    pub fn abort(rank: usize) -> Self {
        Self::new(FrameKind::Abort, (rank as u32).to_le_bytes().to_vec())
    }

    /// Write the frame to a stream
    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u16::<LittleEndian>(PROTOCOL_VERSION)?;
        w.write_u16::<LittleEndian>(self.kind.to_u16())?;
        w.write_u64::<LittleEndian>(self.payload.len() as u64)?;
        w.write_u32::<LittleEndian>(crc32fast::hash(&self.payload))?;
        w.write_all(&self.payload)?;
        w.flush()?;
        Ok(())
    }

    /// Read one frame from a stream
    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CommError::InvalidMagic);
        }

        let version = r.read_u16::<LittleEndian>()?;
        if version != PROTOCOL_VERSION {
            return Err(CommError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let kind_raw = r.read_u16::<LittleEndian>()?;
        let kind = FrameKind::from_u16(kind_raw).ok_or(CommError::UnknownFrameKind(kind_raw))?;

        let payload_len = r.read_u64::<LittleEndian>()?;
        let expected_crc = r.read_u32::<LittleEndian>()?;

        let mut payload = Vec::new();
        r.by_ref().take(payload_len).read_to_end(&mut payload)?;
        if (payload.len() as u64) < payload_len {
            return Err(CommError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("frame payload truncated at {} of {} bytes", payload.len(), payload_len),
            )));
        }

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            return Err(CommError::PayloadCrcMismatch {
                expected: expected_crc,
                got: actual_crc,
            });
        }

        Ok(Self { kind, payload })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(PREAMBLE_SIZE + self.payload.len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::read_from(Cursor::new(data))
    }

    /// Payload interpreted as a rank (hello / abort frames)
    pub fn rank(&self) -> Option<usize> {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(FrameKind::Broadcast, vec![1, 2, 3, 4, 5]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), PREAMBLE_SIZE + 5);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_hello_carries_rank() {
        let decoded = Frame::decode(&Frame::hello(7).encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, FrameKind::Hello);
        assert_eq!(decoded.rank(), Some(7));
    }

    #[test]
    fn test_invalid_magic() {
        let mut encoded = Frame::barrier().encode().unwrap();
        encoded[0] = b'X';
        assert!(matches!(Frame::decode(&encoded), Err(CommError::InvalidMagic)));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut encoded = Frame::new(FrameKind::Broadcast, vec![9; 16]).encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(CommError::PayloadCrcMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let encoded = Frame::new(FrameKind::Broadcast, vec![1; 8]).encode().unwrap();
        assert!(Frame::decode(&encoded[..encoded.len() - 3]).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        let mut encoded = Frame::barrier().encode().unwrap();
        encoded[6] = 0x42;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(CommError::UnknownFrameKind(0x0042))
        ));
    }
}
