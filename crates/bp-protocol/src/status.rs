//! Status codes shared by the wire protocol and the adaptor's "last error".

use std::fmt;
use std::io;

use crate::kind::DataKind;

/// Internal status enum.
///
/// This is both the `u32` status value that begins every provider response
/// (and every field probe) and the value recorded as a client's last error.
/// `IoEagain` and `IoEintr` are finer causes of `IoError` that only arise
/// locally; the public taxonomy folds them back into `IoError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ErrorCode {
    #[default]
    None = 0,
    InvalidParameter = 1,
    OutOfMemory = 2,
    IoError = 3,
    NoData = 4,
    IdNotFound = 5,
    DuplicatedId = 6,
    PermissionDeny = 7,
    DiskBusy = 8,
    DiskFull = 9,
    TooBigData = 10,
    Unknown = 11,
    IoEagain = 12,
    IoEintr = 13,
}

impl ErrorCode {
    /// Decodes a wire status. Values outside the table become `Unknown`.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::InvalidParameter,
            2 => Self::OutOfMemory,
            3 => Self::IoError,
            4 => Self::NoData,
            5 => Self::IdNotFound,
            6 => Self::DuplicatedId,
            7 => Self::PermissionDeny,
            8 => Self::DiskBusy,
            9 => Self::DiskFull,
            10 => Self::TooBigData,
            12 => Self::IoEagain,
            13 => Self::IoEintr,
            _ => Self::Unknown,
        }
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::None)
    }

    /// Transport failures always force a teardown of the connection.
    pub const fn is_transport(self) -> bool {
        matches!(self, Self::IoError | Self::IoEagain | Self::IoEintr)
    }

    /// Classifies a local I/O failure.
    ///
    /// Receive timeouts surface as `IoEagain` (the socket-timeout errno),
    /// interrupted calls as `IoEintr`, everything else as `IoError`.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::IoEagain,
            io::ErrorKind::Interrupted => Self::IoEintr,
            _ => Self::IoError,
        }
    }

    /// Folds this code into the public taxonomy.
    pub const fn public(self) -> PublicError {
        match self {
            Self::None => PublicError::None,
            Self::InvalidParameter => PublicError::InvalidParameter,
            Self::OutOfMemory => PublicError::OutOfMemory,
            Self::IoError | Self::IoEagain | Self::IoEintr => PublicError::IoError,
            Self::NoData => PublicError::NoData,
            Self::IdNotFound => PublicError::IdNotFound,
            Self::DuplicatedId => PublicError::DuplicatedId,
            Self::PermissionDeny => PublicError::PermissionDeny,
            Self::DiskBusy => PublicError::DiskBusy,
            Self::DiskFull => PublicError::DiskFull,
            Self::TooBigData => PublicError::TooBigData,
            Self::Unknown => PublicError::Unknown,
        }
    }

    /// Public numeric code of this status for a data kind.
    pub const fn public_code(self, kind: DataKind) -> i32 {
        self.public().code(kind)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::IoError => "IO_ERROR",
            Self::NoData => "NO_DATA",
            Self::IdNotFound => "ID_NOT_FOUND",
            Self::DuplicatedId => "DUPLICATED_ID",
            Self::PermissionDeny => "PERMISSION_DENY",
            Self::DiskBusy => "DISK_BUSY",
            Self::DiskFull => "DISK_FULL",
            Self::TooBigData => "TOO_BIG_DATA",
            Self::Unknown => "UNKNOWN",
            Self::IoEagain => "IO_EAGAIN",
            Self::IoEintr => "IO_EINTR",
        };
        f.write_str(name)
    }
}

/// Error taxonomy exposed to data-kind callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicError {
    None,
    InvalidParameter,
    OutOfMemory,
    IoError,
    NoData,
    IdNotFound,
    DuplicatedId,
    PermissionDeny,
    DiskBusy,
    DiskFull,
    TooBigData,
    Unknown,
}

impl PublicError {
    const fn ordinal(self) -> i32 {
        match self {
            Self::None => 0,
            Self::InvalidParameter => 1,
            Self::OutOfMemory => 2,
            Self::IoError => 3,
            Self::NoData => 4,
            Self::IdNotFound => 5,
            Self::DuplicatedId => 6,
            Self::PermissionDeny => 7,
            Self::DiskBusy => 8,
            Self::DiskFull => 9,
            Self::TooBigData => 10,
            Self::Unknown => 11,
        }
    }

    /// Numeric code in the data kind's range. `None` is `0` for every kind.
    pub const fn code(self, kind: DataKind) -> i32 {
        match self {
            Self::None => 0,
            other => kind.error_base() + other.ordinal(),
        }
    }
}
