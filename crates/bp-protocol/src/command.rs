//! The fixed-layout command record and the blob transport selector.

use crate::codec::ProtocolError;
use crate::opcode::Opcode;

/// Size in bytes of an encoded [`Command`].
pub const COMMAND_RECORD_LEN: usize = 24;

/// One command record.
///
/// Layout (little-endian, C-compatible):
///
/// ```text
/// ┌──────────┬──────────┬──────────────┬──────────────┐
/// │ opcode   │ padding  │ item id      │ cid          │
/// │ u32 (4B) │ 0 (4B)   │ i64 (8B)     │ i64 (8B)     │
/// └──────────┴──────────┴──────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub id: i64,
    pub cid: i64,
}

impl Command {
    pub const fn new(opcode: Opcode, id: i64, cid: i64) -> Self {
        Self { opcode, id, cid }
    }

    pub fn encode(&self) -> [u8; COMMAND_RECORD_LEN] {
        let mut buf = [0u8; COMMAND_RECORD_LEN];
        buf[0..4].copy_from_slice(&self.opcode.as_u32().to_le_bytes());
        buf[8..16].copy_from_slice(&self.id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.cid.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; COMMAND_RECORD_LEN]) -> Result<Self, ProtocolError> {
        let mut op = [0u8; 4];
        let mut id = [0u8; 8];
        let mut cid = [0u8; 8];
        op.copy_from_slice(&buf[0..4]);
        id.copy_from_slice(&buf[8..16]);
        cid.copy_from_slice(&buf[16..24]);
        Ok(Self {
            opcode: Opcode::try_from(u32::from_le_bytes(op))?,
            id: i64::from_le_bytes(id),
            cid: i64::from_le_bytes(cid),
        })
    }
}

/// Transport selector sent before a non-empty blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Transport {
    /// Bytes follow directly on the socket.
    Inline = 0,
    /// Bytes are in the shared memory segment keyed by the correlation id.
    SharedMemory = 1,
}

impl Transport {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Transport {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Inline),
            1 => Ok(Self::SharedMemory),
            other => Err(ProtocolError::UnknownTransport(other)),
        }
    }
}
