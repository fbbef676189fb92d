//! Command opcodes understood by the provider.

use std::fmt;

use crate::codec::ProtocolError;

/// Every command the adaptor can send.
///
/// The set is fixed for this protocol version. Discriminants are the `u32`
/// values carried in the command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    // Session
    Initialize = 1,
    Deinitialize = 2,
    SetNotiCb = 3,
    UnsetNotiCb = 4,
    CommonNoti = 5,

    // Item lifecycle and queries
    CommonCreate = 10,
    CommonDelete = 11,
    CommonGetIds = 12,
    CommonGetInfo = 13,

    // Integer fields
    GetType = 20,
    SetType = 21,
    GetParent = 22,
    SetParent = 23,
    GetSequence = 24,
    SetSequence = 25,
    GetDateCreated = 26,
    SetDateCreated = 27,
    GetDateModified = 28,
    SetDateModified = 29,
    GetDateVisited = 30,
    SetDateVisited = 31,

    // String fields
    GetUrl = 40,
    SetUrl = 41,
    GetTitle = 42,
    SetTitle = 43,

    // Blob fields
    GetFavicon = 50,
    SetFavicon = 51,
    GetThumbnail = 52,
    SetThumbnail = 53,
    GetSnapshot = 54,
    SetSnapshot = 55,
    GetPageData = 56,
    SetPageData = 57,
}

impl Opcode {
    /// Wire value of this opcode.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns true for opcodes whose `NO_DATA` status means "empty result".
    ///
    /// Only multi-row queries are read-style in this sense; for every other
    /// command `NO_DATA` is a failure.
    pub const fn is_query(self) -> bool {
        matches!(self, Opcode::CommonGetIds)
    }
}

impl TryFrom<u32> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let op = match value {
            1 => Opcode::Initialize,
            2 => Opcode::Deinitialize,
            3 => Opcode::SetNotiCb,
            4 => Opcode::UnsetNotiCb,
            5 => Opcode::CommonNoti,
            10 => Opcode::CommonCreate,
            11 => Opcode::CommonDelete,
            12 => Opcode::CommonGetIds,
            13 => Opcode::CommonGetInfo,
            20 => Opcode::GetType,
            21 => Opcode::SetType,
            22 => Opcode::GetParent,
            23 => Opcode::SetParent,
            24 => Opcode::GetSequence,
            25 => Opcode::SetSequence,
            26 => Opcode::GetDateCreated,
            27 => Opcode::SetDateCreated,
            28 => Opcode::GetDateModified,
            29 => Opcode::SetDateModified,
            30 => Opcode::GetDateVisited,
            31 => Opcode::SetDateVisited,
            40 => Opcode::GetUrl,
            41 => Opcode::SetUrl,
            42 => Opcode::GetTitle,
            43 => Opcode::SetTitle,
            50 => Opcode::GetFavicon,
            51 => Opcode::SetFavicon,
            52 => Opcode::GetThumbnail,
            53 => Opcode::SetThumbnail,
            54 => Opcode::GetSnapshot,
            55 => Opcode::SetSnapshot,
            56 => Opcode::GetPageData,
            57 => Opcode::SetPageData,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        Ok(op)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
