//! BP Protocol - Wire protocol for browser provider communication
//!
//! This crate provides the fixed vocabulary and binary codec shared by the
//! client adaptor and the provider process: opcodes, client kinds, status
//! codes, field identifiers, the command record and the value transport.
//!
//! # Wire Overview
//!
//! ```text
//! client                                   provider
//!   │  Command { opcode, id, cid }  (24B)     │
//!   │────────────────────────────────────────▶│
//!   │  status (u32)                           │
//!   │◀────────────────────────────────────────│
//!   │  opcode-specific payload, fixed order   │
//!   │◀───────────────────────────────────────▶│
//! ```
//!
//! All integers are little-endian. Strings are length-prefixed UTF-8 and
//! are always preceded by a status probe.

pub mod codec;
pub mod command;
pub mod field;
pub mod kind;
pub mod opcode;
pub mod status;

pub use codec::ProtocolError;
pub use command::{Command, Transport, COMMAND_RECORD_LEN};
pub use field::{FieldId, FieldSet, ValueType};
pub use kind::{ClientKind, DataKind};
pub use opcode::Opcode;
pub use status::{ErrorCode, PublicError};

use std::path::{Path, PathBuf};

/// Maximum length in bytes of any string crossing the wire.
pub const MAX_STR_LEN: usize = 4096;

/// Default path of the provider's request socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/browser-provider.sock";

/// Default directory holding per-connection shared memory segments.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Default directory holding per-connection notification FIFOs.
pub const DEFAULT_NOTI_DIR: &str = "/tmp";

/// Item id used when a command does not target a specific item.
pub const NO_ITEM: i64 = -1;

/// Path of the shared memory segment keyed by `cid`.
pub fn segment_path(dir: &Path, cid: i64) -> PathBuf {
    dir.join(format!("bp-shm-{cid}"))
}

/// Path of the notification FIFO for the connection `cid`.
pub fn notification_path(dir: &Path, cid: i64) -> PathBuf {
    dir.join(format!("bp-noti-{cid}"))
}
