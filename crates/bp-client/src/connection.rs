//! One live connection to the provider: the command channel and every
//! typed exchange that follows a command.
//!
//! A `Connection` knows nothing about locking or reconnecting; the client
//! owns it inside its session lock and decides what a failure means. Every
//! read is bounded by the receive timeout.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use bp_protocol::codec;
use bp_protocol::{
    notification_path, segment_path, ClientKind, Command, ErrorCode, FieldId, FieldSet, Opcode,
    Transport, ValueType, NO_ITEM,
};

use crate::blob::{Blob, BlobPayload, TransportPolicy};
use crate::error::{AdaptorError, Result};
use crate::info::{FieldValue, IdQuery, InfoMap, Value};
use crate::listener::{self, ListenerHandle};
use crate::shm::SharedSegment;

/// Outcome of a command whose status allows a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    /// `NONE`: the payload follows.
    Data,
    /// `NO_DATA` on a query: nothing follows.
    Empty,
}

/// Where the bytes of the last in-place blob read live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlobSource {
    Empty,
    Arena,
    Segment,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BlobLocation {
    pub(crate) source: BlobSource,
    pub(crate) len: usize,
    pub(crate) width: Option<i32>,
    pub(crate) height: Option<i32>,
}

/// Bounds a read by the receive timeout. Expiry surfaces as `TimedOut`,
/// which is recorded as `IO_EAGAIN`.
async fn recv<T, E, F>(limit: Duration, fut: F) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: From<io::Error>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "receive timed out").into()),
    }
}

/// Scratch size used when discarding payload bytes.
const DRAIN_CHUNK: usize = 4096;

/// Fills `buf` from the stream. The timeout bounds each read, not the whole
/// transfer, so a slow peer that keeps sending is never cut off.
async fn read_exact_paced(
    stream: &mut UnixStream,
    buf: &mut [u8],
    limit: Duration,
) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = recv(limit, stream.read(&mut buf[filled..])).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended after {filled} of {} bytes", buf.len()),
            ));
        }
        filled += n;
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct Connection {
    /// Distinguishes this connection from earlier ones of the same client.
    pub(crate) generation: u64,
    cid: i64,
    stream: UnixStream,
    recv_timeout: Duration,
    segment: SharedSegment,
    /// Receive buffer for in-place inline blobs.
    arena: Vec<u8>,
    pub(crate) listener: Option<ListenerHandle>,
}

impl Connection {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Runs the handshake on a freshly dialed stream.
    pub(crate) async fn handshake(
        mut stream: UnixStream,
        kind: ClientKind,
        shm_dir: &Path,
        recv_timeout: Duration,
        generation: u64,
    ) -> Result<Self> {
        let init = Command::new(Opcode::Initialize, NO_ITEM, 0);
        codec::write_command(&mut stream, &init).await?;
        codec::write_u32(&mut stream, kind.as_u32()).await?;

        let status = recv(recv_timeout, codec::read_status(&mut stream)).await?;
        if !status.is_ok() {
            return Err(AdaptorError::Handshake {
                code: status,
                reason: format!("provider refused client kind {kind}"),
            });
        }
        let cid = recv(recv_timeout, codec::read_i64(&mut stream)).await?;
        if cid <= 0 {
            return Err(AdaptorError::Handshake {
                code: ErrorCode::IoError,
                reason: format!("provider assigned non-positive correlation id {cid}"),
            });
        }

        Ok(Self {
            generation,
            cid,
            stream,
            recv_timeout,
            segment: SharedSegment::new(segment_path(shm_dir, cid)),
            arena: Vec::new(),
            listener: None,
        })
    }

    pub(crate) fn cid(&self) -> i64 {
        self.cid
    }

    pub(crate) fn listener_running(&self) -> bool {
        self.listener.as_ref().is_some_and(ListenerHandle::is_running)
    }

    /// Detaches the listener and asks it to stop.
    pub(crate) fn stop_listener(&mut self) -> Option<ListenerHandle> {
        let handle = self.listener.take()?;
        handle.cancel();
        Some(handle)
    }

    /// Releases everything the connection owns. The socket closes on drop.
    /// Returns the (cancelled) listener so the caller may join it outside
    /// the lock.
    pub(crate) fn close(mut self, noti_dir: &Path) -> Option<ListenerHandle> {
        let listener = self.stop_listener();
        if let Err(e) = self.segment.unlink() {
            warn!(
                path = %self.segment.path().display(),
                error = %e,
                "Failed to remove shared segment"
            );
        }
        listener::remove_channel(&notification_path(noti_dir, self.cid));
        listener
    }

    // ========================================================================
    // Command channel
    // ========================================================================

    async fn write_command(&mut self, opcode: Opcode, id: i64) -> io::Result<()> {
        trace!(%opcode, id, cid = self.cid, "Sending command");
        codec::write_command(&mut self.stream, &Command::new(opcode, id, self.cid)).await
    }

    /// Writes the record and reads the status, whatever it is.
    pub(crate) async fn send_command(&mut self, opcode: Opcode, id: i64) -> Result<ErrorCode> {
        self.write_command(opcode, id).await?;
        let status = recv(self.recv_timeout, codec::read_status(&mut self.stream)).await?;
        debug!(%opcode, id, %status, "Command answered");
        Ok(status)
    }

    /// Writes the record and does not wait for a reply.
    pub(crate) async fn send_only(&mut self, opcode: Opcode, id: i64) -> io::Result<()> {
        self.write_command(opcode, id).await
    }

    /// A command whose payload follows only on success. `NO_DATA` is an
    /// empty result for queries and a failure for everything else.
    pub(crate) async fn request(&mut self, opcode: Opcode, id: i64) -> Result<Reply> {
        match self.send_command(opcode, id).await? {
            ErrorCode::None => Ok(Reply::Data),
            ErrorCode::NoData if opcode.is_query() => Ok(Reply::Empty),
            status => Err(AdaptorError::Status(status)),
        }
    }

    /// Status the provider sends after consuming a set payload.
    async fn final_status(&mut self) -> Result<()> {
        let status = recv(self.recv_timeout, codec::read_status(&mut self.stream)).await?;
        if status.is_ok() {
            Ok(())
        } else {
            Err(AdaptorError::Status(status))
        }
    }

    /// Discards `len` payload bytes so the stream stays aligned. Each read
    /// is bounded by the receive timeout.
    async fn drain(&mut self, len: usize) -> Result<()> {
        let mut scratch = [0u8; DRAIN_CHUNK];
        let mut left = len;
        while left > 0 {
            let want = left.min(DRAIN_CHUNK);
            let n = recv(self.recv_timeout, self.stream.read(&mut scratch[..want])).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {len} bytes", len - left),
                )
                .into());
            }
            left -= n;
        }
        Ok(())
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub(crate) async fn create(&mut self, id: i64) -> Result<i64> {
        self.request(Opcode::CommonCreate, id).await?;
        Ok(recv(self.recv_timeout, codec::read_i64(&mut self.stream)).await?)
    }

    pub(crate) async fn delete(&mut self, id: i64) -> Result<()> {
        self.request(Opcode::CommonDelete, id).await?;
        Ok(())
    }

    /// The keyword must have been validated; a rejected string here would
    /// leave the command half sent.
    pub(crate) async fn get_ids(&mut self, parent: i64, query: &IdQuery) -> Result<Vec<i64>> {
        if self.request(Opcode::CommonGetIds, parent).await? == Reply::Empty {
            return Ok(Vec::new());
        }
        codec::write_i32(&mut self.stream, query.limit).await?;
        codec::write_i32(&mut self.stream, query.offset).await?;
        codec::write_opt_str(&mut self.stream, query.keyword.as_deref()).await?;

        let count = recv(self.recv_timeout, codec::read_u32(&mut self.stream)).await? as usize;
        let mut ids = Vec::new();
        if ids.try_reserve_exact(count).is_err() {
            let len = count.saturating_mul(8);
            self.drain(len).await?;
            return Err(AdaptorError::OutOfMemory { len });
        }
        for _ in 0..count {
            ids.push(recv(self.recv_timeout, codec::read_i64(&mut self.stream)).await?);
        }
        Ok(ids)
    }

    pub(crate) async fn get_info(&mut self, id: i64, fields: FieldSet) -> Result<InfoMap> {
        self.request(Opcode::CommonGetInfo, id).await?;
        codec::write_u32(&mut self.stream, fields.bits()).await?;

        let mut info = InfoMap::default();
        for field in fields.iter() {
            let marker = recv(self.recv_timeout, codec::read_status(&mut self.stream)).await?;
            let value = match marker {
                ErrorCode::None => match self.read_value(field.value_type()).await {
                    Ok(value) => FieldValue::Present(value),
                    // The blob was consumed; later fields are still aligned.
                    Err(AdaptorError::OutOfMemory { .. }) => {
                        FieldValue::Error(ErrorCode::OutOfMemory)
                    }
                    Err(e) => return Err(e),
                },
                ErrorCode::NoData => FieldValue::Absent,
                other => FieldValue::Error(other),
            };
            trace!(%field, ?value, "Decoded info field");
            info.insert(field, value);
        }
        Ok(info)
    }

    async fn read_value(&mut self, value_type: ValueType) -> Result<Value> {
        let limit = self.recv_timeout;
        Ok(match value_type {
            ValueType::Int => Value::Int(recv(limit, codec::read_i32(&mut self.stream)).await?),
            ValueType::Str => Value::Text(recv(limit, codec::read_str(&mut self.stream)).await?),
            ValueType::Image => Value::Blob(self.read_blob(true).await?),
            ValueType::Bytes => Value::Blob(self.read_blob(false).await?),
        })
    }

    // ========================================================================
    // Single fields
    // ========================================================================

    pub(crate) async fn get_int(&mut self, field: FieldId, id: i64) -> Result<i32> {
        self.request(field.get_opcode(), id).await?;
        Ok(recv(self.recv_timeout, codec::read_i32(&mut self.stream)).await?)
    }

    pub(crate) async fn set_int(&mut self, field: FieldId, id: i64, value: i32) -> Result<()> {
        self.request(field.set_opcode(), id).await?;
        codec::write_i32(&mut self.stream, value).await?;
        self.final_status().await
    }

    pub(crate) async fn get_str(&mut self, field: FieldId, id: i64) -> Result<Option<String>> {
        self.request(field.get_opcode(), id).await?;
        Ok(recv(self.recv_timeout, codec::read_opt_str(&mut self.stream)).await?)
    }

    pub(crate) async fn set_str(&mut self, field: FieldId, id: i64, value: &str) -> Result<()> {
        self.request(field.set_opcode(), id).await?;
        codec::write_opt_str(&mut self.stream, Some(value)).await?;
        self.final_status().await
    }

    pub(crate) async fn get_blob(&mut self, field: FieldId, id: i64) -> Result<Blob> {
        self.request(field.get_opcode(), id).await?;
        self.read_blob(field.value_type() == ValueType::Image).await
    }

    pub(crate) async fn get_blob_in_place(
        &mut self,
        field: FieldId,
        id: i64,
    ) -> Result<BlobLocation> {
        self.request(field.get_opcode(), id).await?;
        self.read_blob_in_place(field.value_type() == ValueType::Image)
            .await
    }

    /// The blob length must fit the `u32` prefix.
    pub(crate) async fn set_blob(
        &mut self,
        field: FieldId,
        id: i64,
        blob: &Blob,
        policy: &dyn TransportPolicy,
    ) -> Result<()> {
        self.request(field.set_opcode(), id).await?;
        self.write_blob(blob, field.value_type() == ValueType::Image, policy)
            .await?;
        self.final_status().await
    }

    // ========================================================================
    // Blob transport
    // ========================================================================

    async fn read_blob_header(&mut self) -> Result<Option<(usize, Transport)>> {
        let len = recv(self.recv_timeout, codec::read_u32(&mut self.stream)).await? as usize;
        if len == 0 {
            return Ok(None);
        }
        let transport = recv(self.recv_timeout, codec::read_transport(&mut self.stream)).await?;
        trace!(len, ?transport, "Receiving blob");
        Ok(Some((len, transport)))
    }

    async fn read_dimensions(&mut self, image: bool) -> Result<(Option<i32>, Option<i32>)> {
        if !image {
            return Ok((None, None));
        }
        let width = recv(self.recv_timeout, codec::read_opt_i32(&mut self.stream)).await?;
        let height = recv(self.recv_timeout, codec::read_opt_i32(&mut self.stream)).await?;
        Ok((width, height))
    }

    /// Maps the segment for `len` bytes the provider placed there.
    fn attached(&mut self, len: usize) -> Result<&[u8]> {
        self.segment.attach(len)?;
        self.segment.bytes(len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "segment shorter than announced").into()
        })
    }

    /// Reads a blob into a fresh buffer. An allocation failure still
    /// consumes the whole blob, dimensions included.
    async fn read_blob(&mut self, image: bool) -> Result<Blob> {
        let mut bytes = Vec::new();
        let mut unallocated = None;
        if let Some((len, transport)) = self.read_blob_header().await? {
            if bytes.try_reserve_exact(len).is_err() {
                unallocated = Some(len);
                if transport == Transport::Inline {
                    self.drain(len).await?;
                }
            } else {
                match transport {
                    Transport::Inline => {
                        bytes.resize(len, 0);
                        read_exact_paced(&mut self.stream, &mut bytes, self.recv_timeout).await?;
                    }
                    Transport::SharedMemory => bytes.extend_from_slice(self.attached(len)?),
                }
            }
        }
        let (width, height) = self.read_dimensions(image).await?;
        match unallocated {
            Some(len) => Err(AdaptorError::OutOfMemory { len }),
            None => Ok(Blob {
                bytes,
                width,
                height,
            }),
        }
    }

    /// Reads a blob without copying it out of the connection: inline bytes
    /// land in the arena, shared bytes stay in the segment.
    async fn read_blob_in_place(&mut self, image: bool) -> Result<BlobLocation> {
        let limit = self.recv_timeout;
        let mut location = BlobLocation {
            source: BlobSource::Empty,
            len: 0,
            width: None,
            height: None,
        };
        let mut unallocated = None;
        if let Some((len, transport)) = self.read_blob_header().await? {
            match transport {
                Transport::Inline => {
                    self.arena.clear();
                    if self.arena.try_reserve_exact(len).is_err() {
                        unallocated = Some(len);
                        self.drain(len).await?;
                    } else {
                        self.arena.resize(len, 0);
                        read_exact_paced(&mut self.stream, &mut self.arena, limit).await?;
                        location.source = BlobSource::Arena;
                        location.len = len;
                    }
                }
                Transport::SharedMemory => {
                    self.attached(len)?;
                    location.source = BlobSource::Segment;
                    location.len = len;
                }
            }
        }
        (location.width, location.height) = self.read_dimensions(image).await?;
        match unallocated {
            Some(len) => Err(AdaptorError::OutOfMemory { len }),
            None => Ok(location),
        }
    }

    /// Bytes of a blob read in place. Empty once the location is stale.
    pub(crate) fn view(&self, location: &BlobLocation) -> &[u8] {
        match location.source {
            BlobSource::Empty => &[],
            BlobSource::Arena => self.arena.get(..location.len).unwrap_or_default(),
            BlobSource::Segment => self.segment.bytes(location.len).unwrap_or_default(),
        }
    }

    async fn write_blob(
        &mut self,
        blob: &Blob,
        image: bool,
        policy: &dyn TransportPolicy,
    ) -> Result<()> {
        let len = u32::try_from(blob.len())
            .map_err(|_| AdaptorError::invalid(format!("blob of {} bytes", blob.len())))?;
        codec::write_u32(&mut self.stream, len).await?;
        if !blob.is_empty() {
            let payload = BlobPayload::plan(&blob.bytes, policy, &mut self.segment);
            trace!(len, transport = ?payload.transport(), "Sending blob");
            codec::write_transport(&mut self.stream, payload.transport()).await?;
            if let BlobPayload::Inline(bytes) = payload {
                self.stream.write_all(bytes).await?;
            }
        }
        if image {
            codec::write_opt_i32(&mut self.stream, blob.width).await?;
            codec::write_opt_i32(&mut self.stream, blob.height).await?;
        }
        Ok(())
    }
}
