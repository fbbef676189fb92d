//! In-process fake provider shared by the adaptor integration tests.
//!
//! The provider speaks the real wire format through `bp_protocol::codec`,
//! keeps items in memory, uses `SharedSegment` for large blobs and writes
//! notifications into each client's FIFO. Knobs on [`ProviderState`] inject
//! the failures the tests need.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bp_client::{AdaptorClient, AdaptorConfig, Blob, SharedSegment};
use bp_protocol::codec;
use bp_protocol::{
    notification_path, segment_path, ClientKind, Command, ErrorCode, FieldId, FieldSet, Opcode,
    Transport, ValueType, COMMAND_RECORD_LEN, NO_ITEM,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Blobs the provider sends from this size up travel through shared memory.
pub const SHARED_REPLY_THRESHOLD: usize = 4096;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(5);
const STALL_DURATION: Duration = Duration::from_secs(2);
const TRICKLE_CHUNK: usize = 256;

type ProviderResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

// ============================================================================
// Provider State
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Item {
    ints: HashMap<FieldId, i32>,
    strs: HashMap<FieldId, String>,
    blobs: HashMap<FieldId, Blob>,
}

#[derive(Debug, Default)]
struct Store {
    last_id: i64,
    items: BTreeMap<i64, Item>,
}

#[derive(Debug, Default)]
pub struct ProviderState {
    store: std::sync::Mutex<Store>,
    writers: Mutex<HashMap<i64, pipe::Sender>>,
    last_cid: AtomicI64,
    /// Connections accepted on the socket.
    pub accepted: AtomicU32,
    /// Command records read after the handshake.
    pub commands: AtomicU32,
    /// Handshakes still to answer with a zero correlation id.
    pub reject_handshakes: AtomicU32,
    /// Close the socket instead of answering the next command.
    pub drop_next_command: AtomicBool,
    /// Sit on the next command without answering.
    pub stall_next_command: AtomicBool,
    /// Delay before answering every command.
    pub response_delay_ms: AtomicU64,
    /// Highest number of commands being answered at the same time.
    pub max_in_flight: AtomicU32,
    /// Pause between the chunks of an inline blob reply.
    pub trickle_ms: AtomicU64,
    /// Connections the provider has finished serving.
    pub closed: AtomicU32,
    in_flight: AtomicU32,
}

impl ProviderState {
    fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut store = self.store.lock().unwrap();
        f(&mut store)
    }

    fn item(&self, id: i64) -> Option<Item> {
        self.with_store(|store| store.items.get(&id).cloned())
    }

    async fn broadcast(&self, from: i64) {
        let record = Command::new(Opcode::CommonNoti, NO_ITEM, from).encode();
        let mut writers = self.writers.lock().await;
        for (cid, writer) in writers.iter_mut() {
            if *cid != from {
                let _ = writer.write_all(&record).await;
            }
        }
    }
}

// ============================================================================
// Fake Provider
// ============================================================================

pub struct FakeProvider {
    pub socket_path: PathBuf,
    pub shm_dir: PathBuf,
    pub noti_dir: PathBuf,
    pub state: Arc<ProviderState>,
    cancel_token: CancellationToken,
    _temp_dir: TempDir,
}

impl FakeProvider {
    pub async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("provider.sock");
        let shm_dir = temp_dir.path().join("shm");
        let noti_dir = temp_dir.path().join("noti");
        std::fs::create_dir(&shm_dir).expect("create shm dir");
        std::fs::create_dir(&noti_dir).expect("create noti dir");

        let listener = UnixListener::bind(&socket_path).expect("bind provider socket");
        let state = Arc::new(ProviderState::default());
        let cancel_token = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            shm_dir.clone(),
            noti_dir.clone(),
            cancel_token.clone(),
        ));

        FakeProvider {
            socket_path,
            shm_dir,
            noti_dir,
            state,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    /// Client configuration pointing at this provider. Automatic
    /// re-registration is off unless a test turns it on.
    pub fn config(&self) -> AdaptorConfig {
        AdaptorConfig {
            socket_path: self.socket_path.clone(),
            shm_dir: self.shm_dir.clone(),
            noti_dir: self.noti_dir.clone(),
            recv_timeout: Duration::from_secs(2),
            renotify_grace: None,
            ..Default::default()
        }
    }

    pub fn client(&self, kind: ClientKind) -> AdaptorClient {
        AdaptorClient::new(kind, self.config()).expect("build client")
    }

    pub fn commands(&self) -> u32 {
        self.state.commands.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> u32 {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Writes one change notification to the client `cid`. False when that
    /// client has no channel registered.
    pub async fn notify(&self, cid: i64) -> bool {
        self.send_raw_notification(cid, Command::new(Opcode::CommonNoti, NO_ITEM, cid).encode())
            .await
    }

    pub async fn send_raw_notification(&self, cid: i64, record: [u8; COMMAND_RECORD_LEN]) -> bool {
        let mut writers = self.state.writers.lock().await;
        match writers.get_mut(&cid) {
            Some(writer) => writer.write_all(&record).await.is_ok(),
            None => false,
        }
    }

    /// Closes the provider's end of the client's notification channel.
    pub async fn close_notifications(&self, cid: i64) -> bool {
        self.state.writers.lock().await.remove(&cid).is_some()
    }

    pub async fn has_notification_channel(&self, cid: i64) -> bool {
        self.state.writers.lock().await.contains_key(&cid)
    }

    pub fn segment_path(&self, cid: i64) -> PathBuf {
        segment_path(&self.shm_dir, cid)
    }

    pub fn notification_path(&self, cid: i64) -> PathBuf {
        notification_path(&self.noti_dir, cid)
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

// ============================================================================
// Connection Handling
// ============================================================================

async fn accept_loop(
    listener: UnixListener,
    state: Arc<ProviderState>,
    shm_dir: PathBuf,
    noti_dir: PathBuf,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        state.clone(),
                        shm_dir.clone(),
                        noti_dir.clone(),
                        cancel_token.clone(),
                    ));
                }
                Err(_) => break,
            },
        }
    }
}

async fn serve(
    mut stream: UnixStream,
    state: Arc<ProviderState>,
    shm_dir: PathBuf,
    noti_dir: PathBuf,
    cancel_token: CancellationToken,
) {
    let cid = match handshake(&mut stream, &state).await {
        Ok(Some(cid)) => cid,
        _ => return,
    };
    let mut conn = ProviderConn {
        stream,
        cid,
        segment: SharedSegment::new(segment_path(&shm_dir, cid)),
        noti_dir,
        state,
    };

    loop {
        let cmd = tokio::select! {
            _ = cancel_token.cancelled() => break,
            cmd = codec::read_command(&mut conn.stream) => match cmd {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };
        let state = conn.state.clone();
        state.commands.fetch_add(1, Ordering::SeqCst);
        if state.drop_next_command.swap(false, Ordering::SeqCst) {
            break;
        }
        if state.stall_next_command.swap(false, Ordering::SeqCst) {
            sleep(STALL_DURATION).await;
            break;
        }

        let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = state.response_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        let keep_going = conn.handle(cmd).await;
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !matches!(keep_going, Ok(true)) {
            break;
        }
    }

    conn.state.writers.lock().await.remove(&conn.cid);
    drop(conn.stream);
    conn.state.closed.fetch_add(1, Ordering::SeqCst);
}

async fn handshake(stream: &mut UnixStream, state: &ProviderState) -> ProviderResult<Option<i64>> {
    let cmd = codec::read_command(stream).await?;
    if cmd.opcode != Opcode::Initialize {
        return Ok(None);
    }
    let _kind = codec::read_u32(stream).await?;

    let reject = state
        .reject_handshakes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    codec::write_status(stream, ErrorCode::None).await?;
    if reject {
        codec::write_i64(stream, 0).await?;
        return Ok(None);
    }
    let cid = state.last_cid.fetch_add(1, Ordering::SeqCst) + 1;
    codec::write_i64(stream, cid).await?;
    Ok(Some(cid))
}

struct ProviderConn {
    stream: UnixStream,
    cid: i64,
    segment: SharedSegment,
    noti_dir: PathBuf,
    state: Arc<ProviderState>,
}

impl ProviderConn {
    async fn status(&mut self, status: ErrorCode) -> ProviderResult<()> {
        codec::write_status(&mut self.stream, status).await?;
        Ok(())
    }

    /// Answers one command. `Ok(false)` closes the connection.
    async fn handle(&mut self, cmd: Command) -> ProviderResult<bool> {
        match cmd.opcode {
            Opcode::Initialize => return Ok(false),
            Opcode::Deinitialize => self.status(ErrorCode::None).await?,
            Opcode::SetNotiCb => {
                let path = notification_path(&self.noti_dir, self.cid);
                let status = match pipe::OpenOptions::new().open_sender(&path) {
                    Ok(writer) => {
                        self.state.writers.lock().await.insert(self.cid, writer);
                        ErrorCode::None
                    }
                    Err(_) => ErrorCode::IoError,
                };
                self.status(status).await?;
            }
            Opcode::UnsetNotiCb => {
                self.state.writers.lock().await.remove(&self.cid);
                self.status(ErrorCode::None).await?;
            }
            Opcode::CommonNoti => self.state.broadcast(self.cid).await,
            Opcode::CommonCreate => {
                let created = self.state.with_store(|store| {
                    let id = if cmd.id >= 0 { cmd.id } else { store.last_id + 1 };
                    if store.items.contains_key(&id) {
                        return Err(ErrorCode::DuplicatedId);
                    }
                    store.last_id = store.last_id.max(id);
                    store.items.insert(id, Item::default());
                    Ok(id)
                });
                match created {
                    Ok(id) => {
                        self.status(ErrorCode::None).await?;
                        codec::write_i64(&mut self.stream, id).await?;
                    }
                    Err(code) => self.status(code).await?,
                }
            }
            Opcode::CommonDelete => {
                let removed = self.state.with_store(|store| store.items.remove(&cmd.id).is_some());
                let status = if removed { ErrorCode::None } else { ErrorCode::IdNotFound };
                self.status(status).await?;
            }
            Opcode::CommonGetIds => self.get_ids(cmd.id).await?,
            Opcode::CommonGetInfo => {
                let Some(item) = self.state.item(cmd.id) else {
                    self.status(ErrorCode::IdNotFound).await?;
                    return Ok(true);
                };
                self.status(ErrorCode::None).await?;
                let mask = codec::read_u32(&mut self.stream).await?;
                for field in FieldSet::from_bits_truncate(mask).iter() {
                    self.write_info_field(&item, field).await?;
                }
            }
            opcode => {
                let Some(field) = FieldId::from_opcode(opcode) else {
                    self.status(ErrorCode::Unknown).await?;
                    return Ok(true);
                };
                let Some(item) = self.state.item(cmd.id) else {
                    self.status(ErrorCode::IdNotFound).await?;
                    return Ok(true);
                };
                if field.get_opcode() == opcode {
                    self.get_field(&item, field).await?;
                } else {
                    self.set_field(cmd.id, field).await?;
                }
            }
        }
        Ok(true)
    }

    async fn get_ids(&mut self, parent: i64) -> ProviderResult<()> {
        let matches_parent = move |item: &Item| {
            parent < 0 || item.ints.get(&FieldId::Parent) == Some(&(parent as i32))
        };
        let any = self
            .state
            .with_store(|store| store.items.values().any(matches_parent));
        if !any {
            return self.status(ErrorCode::NoData).await;
        }
        self.status(ErrorCode::None).await?;

        let limit = codec::read_i32(&mut self.stream).await?;
        let offset = codec::read_i32(&mut self.stream).await?;
        let keyword = codec::read_opt_str(&mut self.stream).await?;
        let ids: Vec<i64> = self.state.with_store(|store| {
            store
                .items
                .iter()
                .filter(|(_, item)| matches_parent(*item))
                .filter(|(_, item)| match &keyword {
                    Some(k) => item.strs.get(&FieldId::Title).is_some_and(|t| t.contains(k.as_str())),
                    None => true,
                })
                .map(|(id, _)| *id)
                .skip(offset.max(0) as usize)
                .take(if limit < 0 { usize::MAX } else { limit as usize })
                .collect()
        });

        codec::write_u32(&mut self.stream, ids.len() as u32).await?;
        for id in ids {
            codec::write_i64(&mut self.stream, id).await?;
        }
        Ok(())
    }

    async fn get_field(&mut self, item: &Item, field: FieldId) -> ProviderResult<()> {
        match field.value_type() {
            ValueType::Int => match item.ints.get(&field) {
                Some(value) => {
                    self.status(ErrorCode::None).await?;
                    codec::write_i32(&mut self.stream, *value).await?;
                }
                None => self.status(ErrorCode::NoData).await?,
            },
            ValueType::Str => {
                self.status(ErrorCode::None).await?;
                codec::write_opt_str(&mut self.stream, item.strs.get(&field).map(String::as_str))
                    .await?;
            }
            ValueType::Image | ValueType::Bytes => {
                self.status(ErrorCode::None).await?;
                let blob = item.blobs.get(&field).cloned().unwrap_or_default();
                self.write_blob(&blob, field.value_type() == ValueType::Image)
                    .await?;
            }
        }
        Ok(())
    }

    async fn set_field(&mut self, id: i64, field: FieldId) -> ProviderResult<()> {
        self.status(ErrorCode::None).await?;
        match field.value_type() {
            ValueType::Int => {
                let value = codec::read_i32(&mut self.stream).await?;
                self.state.with_store(|store| {
                    if let Some(item) = store.items.get_mut(&id) {
                        item.ints.insert(field, value);
                    }
                });
            }
            ValueType::Str => {
                let value = codec::read_opt_str(&mut self.stream).await?;
                self.state.with_store(|store| {
                    if let Some(item) = store.items.get_mut(&id) {
                        match value {
                            Some(value) => item.strs.insert(field, value),
                            None => item.strs.remove(&field),
                        };
                    }
                });
            }
            ValueType::Image | ValueType::Bytes => {
                let blob = self
                    .read_blob(field.value_type() == ValueType::Image)
                    .await?;
                self.state.with_store(|store| {
                    if let Some(item) = store.items.get_mut(&id) {
                        if blob.is_empty() {
                            item.blobs.remove(&field);
                        } else {
                            item.blobs.insert(field, blob);
                        }
                    }
                });
            }
        }
        self.status(ErrorCode::None).await
    }

    async fn write_info_field(&mut self, item: &Item, field: FieldId) -> ProviderResult<()> {
        match field.value_type() {
            ValueType::Int => match item.ints.get(&field) {
                Some(value) => {
                    self.status(ErrorCode::None).await?;
                    codec::write_i32(&mut self.stream, *value).await?;
                }
                None => self.status(ErrorCode::NoData).await?,
            },
            ValueType::Str => match item.strs.get(&field) {
                Some(value) => {
                    self.status(ErrorCode::None).await?;
                    codec::write_str(&mut self.stream, value).await?;
                }
                None => self.status(ErrorCode::NoData).await?,
            },
            ValueType::Image | ValueType::Bytes => match item.blobs.get(&field) {
                Some(blob) => {
                    self.status(ErrorCode::None).await?;
                    self.write_blob(blob, field.value_type() == ValueType::Image)
                        .await?;
                }
                None => self.status(ErrorCode::NoData).await?,
            },
        }
        Ok(())
    }

    async fn write_blob(&mut self, blob: &Blob, image: bool) -> ProviderResult<()> {
        codec::write_u32(&mut self.stream, blob.len() as u32).await?;
        if !blob.is_empty() {
            if blob.len() >= SHARED_REPLY_THRESHOLD {
                self.segment.prepare(blob.len())?;
                self.segment.write(&blob.bytes)?;
                codec::write_transport(&mut self.stream, Transport::SharedMemory).await?;
            } else {
                codec::write_transport(&mut self.stream, Transport::Inline).await?;
                let trickle = self.state.trickle_ms.load(Ordering::SeqCst);
                if trickle == 0 {
                    self.stream.write_all(&blob.bytes).await?;
                } else {
                    for chunk in blob.bytes.chunks(TRICKLE_CHUNK) {
                        sleep(Duration::from_millis(trickle)).await;
                        self.stream.write_all(chunk).await?;
                    }
                }
            }
        }
        if image {
            codec::write_opt_i32(&mut self.stream, blob.width).await?;
            codec::write_opt_i32(&mut self.stream, blob.height).await?;
        }
        Ok(())
    }

    async fn read_blob(&mut self, image: bool) -> ProviderResult<Blob> {
        let len = codec::read_u32(&mut self.stream).await? as usize;
        let mut blob = Blob::default();
        if len > 0 {
            match codec::read_transport(&mut self.stream).await? {
                Transport::Inline => {
                    blob.bytes = vec![0; len];
                    self.stream.read_exact(&mut blob.bytes).await?;
                }
                Transport::SharedMemory => {
                    self.segment.attach(len)?;
                    blob.bytes = self
                        .segment
                        .bytes(len)
                        .ok_or("segment shorter than announced")?
                        .to_vec();
                }
            }
        }
        if image {
            blob.width = codec::read_opt_i32(&mut self.stream).await?;
            blob.height = codec::read_opt_i32(&mut self.stream).await?;
        }
        Ok(blob)
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Waits until the client holds a connection whose id differs from `old`.
pub async fn wait_for_new_cid(client: &AdaptorClient, old: i64) -> Option<i64> {
    let start = Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        match client.correlation_id().await {
            Some(cid) if cid != old => return Some(cid),
            _ => sleep(POLL_INTERVAL).await,
        }
    }
    None
}
