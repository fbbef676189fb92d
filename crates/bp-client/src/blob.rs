//! Blobs and the choice between inline and shared-memory delivery.
//!
//! The sender alone decides how a blob travels. That decision is split in
//! two so it can be tested without a socket: a [`TransportPolicy`] says what
//! it would like for a given length, and [`BlobPayload::plan`] turns that
//! into a concrete payload once the segment has (or has not) been prepared.

use std::fmt;

use tracing::warn;

use bp_protocol::Transport;

use crate::shm::SharedSegment;

/// An owned blob, optionally carrying image dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            width: None,
            height: None,
        }
    }

    pub fn image(bytes: impl Into<Vec<u8>>, width: i32, height: i32) -> Self {
        Self {
            bytes: bytes.into(),
            width: Some(width),
            height: Some(height),
        }
    }

    /// Length `0` is the "no blob" state, not an error.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Chooses the transport for an outgoing blob of a given length.
pub trait TransportPolicy: Send + Sync + fmt::Debug {
    fn select(&self, len: usize) -> Transport;
}

/// Shared memory from `min_shared_len` bytes up, inline below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThreshold {
    pub min_shared_len: usize,
}

impl SizeThreshold {
    pub const fn new(min_shared_len: usize) -> Self {
        Self { min_shared_len }
    }
}

impl TransportPolicy for SizeThreshold {
    fn select(&self, len: usize) -> Transport {
        if len >= self.min_shared_len {
            Transport::SharedMemory
        } else {
            Transport::Inline
        }
    }
}

/// Never uses shared memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysInline;

impl TransportPolicy for AlwaysInline {
    fn select(&self, _len: usize) -> Transport {
        Transport::Inline
    }
}

/// An outgoing, non-empty blob as it will be put on the wire.
#[derive(Debug)]
pub enum BlobPayload<'a> {
    /// Bytes to write after the selector.
    Inline(&'a [u8]),
    /// Bytes already copied into the segment.
    Shared {
        segment: &'a SharedSegment,
        len: usize,
    },
}

impl<'a> BlobPayload<'a> {
    /// Applies `policy` to `bytes`. When shared memory is wanted the
    /// segment is prepared and filled first; if that fails the blob falls
    /// back to inline delivery.
    pub fn plan(
        bytes: &'a [u8],
        policy: &dyn TransportPolicy,
        segment: &'a mut SharedSegment,
    ) -> Self {
        let len = bytes.len();
        match policy.select(len) {
            Transport::Inline => Self::Inline(bytes),
            Transport::SharedMemory => {
                let filled = segment.prepare(len).and_then(|()| segment.write(bytes));
                match filled {
                    Ok(()) => Self::Shared { segment, len },
                    Err(e) => {
                        warn!(
                            path = %segment.path().display(),
                            len,
                            error = %e,
                            "Shared segment unavailable, sending blob inline"
                        );
                        Self::Inline(bytes)
                    }
                }
            }
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Self::Inline(_) => Transport::Inline,
            Self::Shared { .. } => Transport::SharedMemory,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Inline(bytes) => bytes.len(),
            Self::Shared { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
