//! Error types for the adaptor.
//!
//! Every variant maps onto one [`ErrorCode`], which is what the client
//! records as its last error. The variants follow the failure classes the
//! adaptor distinguishes:
//!
//! - local precondition violations, rejected before any I/O
//! - transport failures, which always tear the connection down
//! - allocation failures, after which the connection survives
//! - statuses reported by the provider, passed through unchanged
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use thiserror::Error;

use bp_protocol::{ErrorCode, ProtocolError};

// ============================================================================
// Adaptor Error Type
// ============================================================================

/// Adaptor errors.
///
/// # Example
///
/// ```rust
/// use bp_client::AdaptorError;
/// use bp_protocol::ErrorCode;
///
/// let err = AdaptorError::Status(ErrorCode::IdNotFound);
/// assert_eq!(err.code(), ErrorCode::IdNotFound);
/// assert!(!err.is_transport());
/// ```
#[derive(Error, Debug)]
pub enum AdaptorError {
    /// A local precondition failed; nothing was sent.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A receive buffer could not be allocated.
    #[error("Out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    /// The request socket failed. The connection has been torn down.
    #[error("IO error ({code}): {source}")]
    Io {
        code: ErrorCode,
        #[source]
        source: io::Error,
    },

    /// Encoding or decoding a value failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The provider answered with a failure status.
    #[error("Provider returned {0}")]
    Status(ErrorCode),

    /// The provider refused or botched the handshake.
    #[error("Handshake failed ({code}): {reason}")]
    Handshake { code: ErrorCode, reason: String },

    /// No connection could be opened to the provider socket.
    #[error("Failed to connect to provider after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be loaded.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AdaptorError {
    /// The status this error is recorded as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameter(_) | Self::Config(_) => ErrorCode::InvalidParameter,
            Self::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Self::Io { code, .. } => *code,
            Self::Protocol(err) => err.code(),
            Self::Status(code) => *code,
            Self::Handshake { code, .. } => *code,
            Self::Connect { .. } => ErrorCode::IoError,
        }
    }

    /// Returns true when this failure forces a connection teardown.
    pub fn is_transport(&self) -> bool {
        self.code().is_transport()
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter(reason.into())
    }
}

impl From<io::Error> for AdaptorError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            code: ErrorCode::from_io(&source),
            source,
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for adaptor operations.
pub type Result<T> = std::result::Result<T, AdaptorError>;

// ============================================================================
// Tests
// ============================================================================
