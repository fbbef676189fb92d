//! The adaptor handle data-kind modules call.
//!
//! An [`AdaptorClient`] owns one lazily established connection to the
//! provider for one client kind. Every operation is a single critical
//! section under the client's session lock:
//!
//! ```text
//! lock ─▶ ensure connected ─▶ command ─▶ status ─▶ payload ─▶ record last error ─▶ unlock
//! ```
//!
//! so concurrent callers never interleave bytes on the socket. A transport
//! failure tears the connection down before the error is returned; the
//! next call reconnects from scratch.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::fmt;
use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use bp_protocol::codec;
use bp_protocol::{notification_path, ClientKind, ErrorCode, FieldId, FieldSet, Opcode, ValueType, NO_ITEM};

use crate::blob::{Blob, SizeThreshold, TransportPolicy};
use crate::config::AdaptorConfig;
use crate::connection::{BlobLocation, Connection};
use crate::dialer::{Dialer, UnixDialer};
use crate::error::{AdaptorError, Result};
use crate::info::{IdQuery, InfoMap};
use crate::listener::{
    self, ListenerContext, ListenerHandle, ListenerState, NotifyCallback, StateBoard,
};

// ============================================================================
// Session State
// ============================================================================

/// The active notification callback. The id tells a re-registration apart
/// from a callback the caller has since replaced.
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) id: u64,
    pub(crate) callback: NotifyCallback,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

/// Everything guarded by the client lock.
#[derive(Debug, Default)]
pub(crate) struct Session {
    conn: Option<Connection>,
    last_error: ErrorCode,
    registration: Option<Registration>,
    next_generation: u64,
    next_registration: u64,
}

/// Snapshot of connection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    /// Sockets dialed, successful or not.
    pub connect_attempts: u64,
    /// Handshakes completed.
    pub connects: u64,
    /// Connections torn down, for any reason.
    pub teardowns: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connects: AtomicU64,
    teardowns: AtomicU64,
}

pub(crate) struct Inner {
    kind: ClientKind,
    config: AdaptorConfig,
    dialer: Box<dyn Dialer>,
    policy: Box<dyn TransportPolicy>,
    session: Mutex<Session>,
    listener_state: Arc<StateBoard>,
    counters: Counters,
}

impl Inner {
    /// Returns the live connection, establishing it first if needed.
    ///
    /// A registered callback is installed on every fresh connection. With
    /// `want_notifications` a failed install fails the call; otherwise only
    /// transport failures do, and those also tear the connection down.
    async fn connect<'s>(
        self: &Arc<Self>,
        session: &'s mut Session,
        want_notifications: bool,
    ) -> Result<&'s mut Connection> {
        let fresh = session.conn.is_none();
        if fresh {
            let generation = session.next_generation;
            session.next_generation += 1;
            session.conn = Some(self.establish(generation).await?);
        }
        if want_notifications || fresh {
            if let Err(e) = self.install_listener(session).await {
                if e.is_transport() {
                    // A reply may still be in flight; the stream is unusable.
                    drop(self.teardown_locked(session));
                    return Err(e);
                }
                if want_notifications {
                    return Err(e);
                }
                warn!(error = %e, "Notification callback not reinstalled");
            }
        }
        session.conn.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "connection vanished").into()
        })
    }

    /// Dials up to `connect_attempts` times back to back, then handshakes
    /// on the first socket that opens.
    async fn establish(&self, generation: u64) -> Result<Connection> {
        let attempts = self.config.connect_attempts;
        let mut last_failure = None;

        for attempt in 1..=attempts {
            self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
            match self.dialer.dial().await {
                Ok(stream) => return self.handshake(stream, attempt, generation).await,
                Err(e) => {
                    debug!(attempt, error = %e, "Connect attempt failed");
                    last_failure = Some(e);
                }
            }
        }

        warn!(attempts, kind = %self.kind, "Provider unreachable");
        Err(AdaptorError::Connect {
            attempts,
            source: last_failure.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "no connect attempt made")
            }),
        })
    }

    async fn handshake(
        &self,
        stream: tokio::net::UnixStream,
        attempt: u32,
        generation: u64,
    ) -> Result<Connection> {
        let config = &self.config;
        match Connection::handshake(stream, self.kind, &config.shm_dir, config.recv_timeout, generation)
            .await
        {
            Ok(conn) => {
                self.counters.connects.fetch_add(1, Ordering::Relaxed);
                info!(cid = conn.cid(), kind = %self.kind, attempt, "Connected to provider");
                Ok(conn)
            }
            Err(e) => {
                warn!(attempt, error = %e, "Handshake failed");
                sleep(config.handshake_failure_delay).await;
                Err(e)
            }
        }
    }

    /// Opens the FIFO, registers with the provider and spawns the listener.
    /// The read side is opened before `SET_NOTI_CB` so the provider always
    /// finds a reader.
    async fn install_listener(self: &Arc<Self>, session: &mut Session) -> Result<()> {
        let Some(registration) = session.registration.clone() else {
            return Ok(());
        };
        let Some(conn) = session.conn.as_mut() else {
            return Ok(());
        };
        if conn.listener_running() {
            return Ok(());
        }

        let path = notification_path(&self.config.noti_dir, conn.cid());
        let receiver = listener::open_channel(&path)?;
        conn.request(Opcode::SetNotiCb, NO_ITEM).await?;

        let ctx = ListenerContext {
            client: Arc::downgrade(self),
            generation: conn.generation,
            cid: conn.cid(),
            registration,
            state: self.listener_state.claim(),
            grace: self.config.renotify_grace,
        };
        conn.listener = Some(listener::spawn(receiver, ctx));
        info!(cid = conn.cid(), path = %path.display(), "Notification listener installed");
        Ok(())
    }

    /// Records the outcome as the last error and tears down on transport
    /// failures.
    fn settle<T>(&self, session: &mut Session, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => session.last_error = ErrorCode::None,
            Err(e) => {
                session.last_error = e.code();
                if e.is_transport() {
                    debug!(error = %e, "Transport failure, tearing down");
                    // Not joined: the listener may be waiting for this lock.
                    drop(self.teardown_locked(session));
                }
            }
        }
        result
    }

    /// Takes the connection out of the session and releases it. A no-op
    /// when there is none.
    fn teardown_locked(&self, session: &mut Session) -> Option<ListenerHandle> {
        let conn = session.conn.take()?;
        self.counters.teardowns.fetch_add(1, Ordering::Relaxed);
        info!(cid = conn.cid(), generation = conn.generation, "Connection closed");
        conn.close(&self.config.noti_dir)
    }

    /// Teardown requested by the listener of connection `generation`. Does
    /// nothing if that connection is already gone.
    pub(crate) async fn teardown_generation(&self, generation: u64) {
        let mut session = self.session.lock().await;
        let Some(conn) = session.conn.as_mut() else {
            return;
        };
        if conn.generation != generation {
            return;
        }
        // The caller is that listener; it keeps running past this point.
        drop(conn.listener.take());
        drop(self.teardown_locked(&mut session));
    }

    /// Re-registers `registration` on a fresh connection unless the caller
    /// has replaced or removed it in the meantime.
    pub(crate) async fn reinstall(self: &Arc<Self>, registration: &Registration) {
        let mut session = self.session.lock().await;
        if session.registration.as_ref().map(|r| r.id) != Some(registration.id) {
            debug!(id = registration.id, "Callback replaced, not re-registering");
            return;
        }
        let result = self.connect(&mut session, true).await.map(|_| ());
        match &result {
            Ok(()) => info!(id = registration.id, "Notification callback re-registered"),
            Err(e) => warn!(error = %e, "Failed to re-register notification callback"),
        }
        // Already logged; the last error records it for the next caller.
        let _ = self.settle(&mut session, result);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(conn) = self.session.get_mut().conn.take() {
            drop(conn.close(&self.config.noti_dir));
        }
    }
}

// ============================================================================
// Preconditions
// ============================================================================

fn check_item(id: i64) -> Result<()> {
    if id < 0 {
        return Err(AdaptorError::invalid(format!("item id {id} is negative")));
    }
    Ok(())
}

fn check_type(field: FieldId, wanted: &[ValueType]) -> Result<()> {
    if !wanted.contains(&field.value_type()) {
        return Err(AdaptorError::invalid(format!(
            "{field} holds {:?} values",
            field.value_type()
        )));
    }
    Ok(())
}

fn check_str(value: &str) -> Result<()> {
    codec::validate_str(value).map_err(|e| AdaptorError::invalid(e.to_string()))
}

// ============================================================================
// Client
// ============================================================================

/// Handle to the provider for one client kind.
///
/// Cheap to clone; clones share the connection and the lock. Independent
/// handles for the same kind have independent connections.
///
/// # Example
///
/// ```rust,no_run
/// use bp_client::{AdaptorClient, AdaptorConfig};
/// use bp_protocol::{ClientKind, FieldId};
///
/// # async fn demo() -> bp_client::Result<()> {
/// let bookmarks = AdaptorClient::new(ClientKind::Bookmark, AdaptorConfig::from_env())?;
/// let id = bookmarks.create(None).await?;
/// bookmarks.set_str(id, FieldId::Title, "Rust").await?;
/// assert_eq!(bookmarks.get_str(id, FieldId::Title).await?.as_deref(), Some("Rust"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AdaptorClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for AdaptorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptorClient")
            .field("kind", &self.inner.kind)
            .field("socket_path", &self.inner.config.socket_path)
            .finish()
    }
}

/// Builder for [`AdaptorClient`] with a custom dialer or transport policy.
#[derive(Debug)]
pub struct AdaptorClientBuilder {
    kind: ClientKind,
    config: AdaptorConfig,
    dialer: Option<Box<dyn Dialer>>,
    policy: Option<Box<dyn TransportPolicy>>,
}

impl AdaptorClientBuilder {
    pub fn config(mut self, config: AdaptorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Box::new(dialer));
        self
    }

    pub fn policy(mut self, policy: impl TransportPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    pub fn build(self) -> Result<AdaptorClient> {
        self.config.validate()?;
        let dialer: Box<dyn Dialer> = match self.dialer {
            Some(dialer) => dialer,
            None => Box::new(UnixDialer::new(self.config.socket_path.clone())),
        };
        let policy: Box<dyn TransportPolicy> = match self.policy {
            Some(policy) => policy,
            None => Box::new(SizeThreshold::new(self.config.shm_threshold)),
        };
        Ok(AdaptorClient {
            inner: Arc::new(Inner {
                kind: self.kind,
                config: self.config,
                dialer,
                policy,
                session: Mutex::new(Session::default()),
                listener_state: Arc::new(StateBoard::new()),
                counters: Counters::default(),
            }),
        })
    }
}

impl AdaptorClient {
    /// Creates a client that dials `config.socket_path`. Nothing is
    /// connected until the first call.
    pub fn new(kind: ClientKind, config: AdaptorConfig) -> Result<Self> {
        Self::builder(kind).config(config).build()
    }

    /// Starts a builder with configuration from the environment.
    pub fn builder(kind: ClientKind) -> AdaptorClientBuilder {
        AdaptorClientBuilder {
            kind,
            config: AdaptorConfig::from_env(),
            dialer: None,
            policy: None,
        }
    }

    pub fn kind(&self) -> ClientKind {
        self.inner.kind
    }

    pub fn config(&self) -> &AdaptorConfig {
        &self.inner.config
    }

    // ========================================================================
    // Connection Lifecycle
    // ========================================================================

    /// Connects if needed. With `want_notifications`, also (re)installs the
    /// listener for a registered callback.
    pub async fn ensure_connected(&self, want_notifications: bool) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let result = self
            .inner
            .connect(&mut session, want_notifications)
            .await
            .map(|_| ());
        self.inner.settle(&mut session, result)
    }

    /// Closes the connection and forgets the notification callback.
    ///
    /// Waits for a callback in progress to return. Calling it again, or
    /// without a connection, does nothing.
    pub async fn disconnect(&self) {
        let listener = {
            let mut session = self.inner.session.lock().await;
            session.registration = None;
            self.inner.teardown_locked(&mut session)
        };
        if let Some(handle) = listener {
            handle.join().await;
        }
    }

    /// Tells the provider this client is leaving, then disconnects
    /// whatever the reply.
    pub async fn deinitialize(&self) -> Result<()> {
        let (result, listener) = {
            let mut session = self.inner.session.lock().await;
            session.registration = None;
            let result = match session.conn.as_mut() {
                Some(conn) => conn.send_command(Opcode::Deinitialize, NO_ITEM).await.map(|status| {
                    debug!(%status, "Deinitialize acknowledged");
                }),
                None => Ok(()),
            };
            session.last_error = match &result {
                Ok(()) => ErrorCode::None,
                Err(e) => e.code(),
            };
            (result, self.inner.teardown_locked(&mut session))
        };
        if let Some(handle) = listener {
            handle.join().await;
        }
        result
    }

    // ========================================================================
    // Raw Commands
    // ========================================================================

    /// Sends `opcode` and returns the provider's status as is. Only
    /// transport failures are errors.
    pub async fn send_command(&self, opcode: Opcode, id: i64) -> Result<ErrorCode> {
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .send_command(opcode, id)
                .await
        }
        .await;
        let status = self.inner.settle(&mut session, result)?;
        session.last_error = status;
        Ok(status)
    }

    /// Sends `opcode` without waiting for a reply. A failed write is
    /// reported but does not tear the connection down; a failed connect
    /// is settled like any other call.
    pub async fn send_only(&self, opcode: Opcode, id: i64) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let connected = self.inner.connect(&mut session, false).await.map(|_| ());
        if let Err(e) = connected {
            return self.inner.settle(&mut session, Err(e));
        }
        let result = match session.conn.as_mut() {
            Some(conn) => conn.send_only(opcode, id).await.map_err(AdaptorError::from),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection vanished").into()),
        };
        session.last_error = match &result {
            Ok(()) => ErrorCode::None,
            Err(e) => e.code(),
        };
        result
    }

    /// Tells other clients of this kind that the store changed.
    pub async fn publish_change(&self) -> Result<()> {
        self.send_only(Opcode::CommonNoti, NO_ITEM).await
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Creates an item, with the given id or one the provider picks.
    pub async fn create(&self, id: Option<i64>) -> Result<i64> {
        let wanted = match id {
            Some(id) => {
                check_item(id)?;
                id
            }
            None => NO_ITEM,
        };
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .create(wanted)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        check_item(id)?;
        let mut session = self.inner.session.lock().await;
        let result = async { self.inner.connect(&mut session, false).await?.delete(id).await }.await;
        self.inner.settle(&mut session, result)
    }

    /// Lists item ids, optionally under `parent`. An empty store is an
    /// empty list, not an error.
    pub async fn get_ids(&self, parent: Option<i64>, query: &IdQuery) -> Result<Vec<i64>> {
        let parent = match parent {
            Some(id) => {
                check_item(id)?;
                id
            }
            None => NO_ITEM,
        };
        if let Some(keyword) = &query.keyword {
            check_str(keyword)?;
        }
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .get_ids(parent, query)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    /// Reads several fields of one item in a single exchange.
    pub async fn get_info(&self, id: i64, fields: FieldSet) -> Result<InfoMap> {
        check_item(id)?;
        if fields.is_empty() {
            return Err(AdaptorError::invalid("no fields requested"));
        }
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .get_info(id, fields)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    // ========================================================================
    // Single Fields
    // ========================================================================

    pub async fn get_int(&self, id: i64, field: FieldId) -> Result<i32> {
        check_item(id)?;
        check_type(field, &[ValueType::Int])?;
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .get_int(field, id)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    pub async fn set_int(&self, id: i64, field: FieldId, value: i32) -> Result<()> {
        check_item(id)?;
        check_type(field, &[ValueType::Int])?;
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .set_int(field, id, value)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    /// `Ok(None)` when the item exists but has no value for `field`.
    pub async fn get_str(&self, id: i64, field: FieldId) -> Result<Option<String>> {
        check_item(id)?;
        check_type(field, &[ValueType::Str])?;
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .get_str(field, id)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    /// Rejects empty and over-long strings before anything is sent.
    pub async fn set_str(&self, id: i64, field: FieldId, value: &str) -> Result<()> {
        check_item(id)?;
        check_type(field, &[ValueType::Str])?;
        check_str(value)?;
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .set_str(field, id, value)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    // ========================================================================
    // Blobs
    // ========================================================================

    /// Returns an owned copy of the blob, whichever way it travelled. An
    /// empty blob means the item has none.
    pub async fn get_blob(&self, id: i64, field: FieldId) -> Result<Blob> {
        check_item(id)?;
        check_type(field, &[ValueType::Image, ValueType::Bytes])?;
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .get_blob(field, id)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    /// Zero-copy read. The view borrows the connection's buffers and holds
    /// the client lock until dropped, so no other call (and no teardown)
    /// can run meanwhile.
    pub async fn get_blob_view(&self, id: i64, field: FieldId) -> Result<BlobView<'_>> {
        check_item(id)?;
        check_type(field, &[ValueType::Image, ValueType::Bytes])?;
        let mut session = self.inner.session.lock().await;
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .get_blob_in_place(field, id)
                .await
        }
        .await;
        let location = self.inner.settle(&mut session, result)?;
        Ok(BlobView { session, location })
    }

    /// Stores a blob. An empty blob clears the field. Dimensions are only
    /// sent for image fields.
    pub async fn set_blob(&self, id: i64, field: FieldId, blob: &Blob) -> Result<()> {
        check_item(id)?;
        check_type(field, &[ValueType::Image, ValueType::Bytes])?;
        if u32::try_from(blob.len()).is_err() {
            return Err(AdaptorError::invalid(format!("blob of {} bytes", blob.len())));
        }
        let mut session = self.inner.session.lock().await;
        let policy = self.inner.policy.as_ref();
        let result = async {
            self.inner
                .connect(&mut session, false)
                .await?
                .set_blob(field, id, blob, policy)
                .await
        }
        .await;
        self.inner.settle(&mut session, result)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Registers `callback` for change notifications, replacing any
    /// previous one, and starts listening.
    pub async fn set_notification_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (result, stale) = {
            let mut session = self.inner.session.lock().await;
            session.next_registration += 1;
            session.registration = Some(Registration {
                id: session.next_registration,
                callback: Arc::new(callback),
            });
            let stale = session.conn.as_mut().and_then(Connection::stop_listener);

            let result = self.inner.connect(&mut session, true).await.map(|_| ());
            if result.is_err() {
                session.registration = None;
            }
            (self.inner.settle(&mut session, result), stale)
        };
        if let Some(handle) = stale {
            handle.join().await;
        }
        result
    }

    /// Stops listening and unregisters with the provider.
    pub async fn unset_notification_callback(&self) -> Result<()> {
        let (result, stale) = {
            let mut session = self.inner.session.lock().await;
            session.registration = None;
            let stale = session.conn.as_mut().and_then(Connection::stop_listener);
            let result = match session.conn.as_mut() {
                Some(conn) => conn.request(Opcode::UnsetNotiCb, NO_ITEM).await.map(|_| ()),
                None => Ok(()),
            };
            (self.inner.settle(&mut session, result), stale)
        };
        if let Some(handle) = stale {
            handle.join().await;
        }
        result
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Status recorded by the most recent call that reached the socket.
    pub async fn last_error(&self) -> ErrorCode {
        self.inner.session.lock().await.last_error
    }

    /// The last error in this kind's public numbering.
    pub async fn last_public_error(&self) -> i32 {
        self.last_error().await.public_code(self.inner.kind.data_kind())
    }

    pub fn listener_state(&self) -> ListenerState {
        self.inner.listener_state.current()
    }

    /// Receives every listener state change from now on.
    pub fn subscribe_listener_state(&self) -> watch::Receiver<ListenerState> {
        self.inner.listener_state.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        let counters = &self.inner.counters;
        ConnectionStats {
            connect_attempts: counters.connect_attempts.load(Ordering::Relaxed),
            connects: counters.connects.load(Ordering::Relaxed),
            teardowns: counters.teardowns.load(Ordering::Relaxed),
        }
    }

    /// Correlation id of the live connection, if any.
    pub async fn correlation_id(&self) -> Option<i64> {
        self.inner
            .session
            .lock()
            .await
            .conn
            .as_ref()
            .map(Connection::cid)
    }
}

// ============================================================================
// Blob View
// ============================================================================

/// A blob read without copying, valid while the view is alive.
///
/// The bytes live either in the connection's receive arena or in its
/// shared segment. The view keeps the client locked, so the next blob
/// call cannot start (and cannot invalidate the bytes) until it is
/// dropped.
pub struct BlobView<'a> {
    session: MutexGuard<'a, Session>,
    location: BlobLocation,
}

impl BlobView<'_> {
    pub fn bytes(&self) -> &[u8] {
        match &self.session.conn {
            Some(conn) => conn.view(&self.location),
            None => &[],
        }
    }

    pub fn width(&self) -> Option<i32> {
        self.location.width
    }

    pub fn height(&self) -> Option<i32> {
        self.location.height
    }

    /// Copies the view into an owned blob.
    pub fn to_blob(&self) -> Blob {
        Blob {
            bytes: self.bytes().to_vec(),
            width: self.location.width,
            height: self.location.height,
        }
    }
}

impl Deref for BlobView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl fmt::Debug for BlobView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobView")
            .field("len", &self.bytes().len())
            .field("width", &self.location.width)
            .field("height", &self.location.height)
            .finish()
    }
}
