//! BP Client - Adaptor for browser provider data kinds
//!
//! This library is the plumbing shared by the bookmark, history, tab and
//! scrap modules: it connects to the provider process, sends typed
//! commands, moves values and blobs, and delivers change notifications.
//!
//! # Architecture
//!
//! Each [`AdaptorClient`] owns one connection made of:
//!
//! 1. **Request socket**: one command in flight at a time, serialized by
//!    the client lock
//! 2. **Shared segment**: file-backed memory keyed by the correlation id,
//!    used for large blobs
//! 3. **Notification listener**: a background task reading the
//!    connection's FIFO and invoking the registered callback
//!
//! Transport failures tear the connection down and the next call
//! reconnects. The listener tears down on its own when the provider goes
//! away and re-registers its callback after a grace period.
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod blob;
pub mod client;
pub mod config;
mod connection;
pub mod dialer;
pub mod error;
pub mod info;
pub mod listener;
pub mod shm;

// Re-export commonly used types
pub use blob::{AlwaysInline, Blob, BlobPayload, SizeThreshold, TransportPolicy};
pub use client::{AdaptorClient, AdaptorClientBuilder, BlobView, ConnectionStats};
pub use config::AdaptorConfig;
pub use dialer::{Dialer, UnixDialer};
pub use error::{AdaptorError, Result};
pub use info::{FieldValue, IdQuery, InfoMap, Value};
pub use listener::{ListenerExit, ListenerState, NotifyCallback};
pub use shm::SharedSegment;
