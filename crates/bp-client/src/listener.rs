//! Notification listener.
//!
//! One background task per connection reads 24-byte command records from the
//! connection's FIFO and invokes the registered callback for every
//! `COMMON_NOTI` record:
//!
//! ```text
//! Idle ──▶ Listening ──▶ Delivering ──▶ Listening ──▶ ... ──▶ Stopped(exit)
//! ```
//!
//! Cancellation is only observed at the top of the read loop. The callback
//! runs outside the `select!`, so once a record has been read the callback
//! always runs to completion; teardown cancels the token and then joins the
//! task, which therefore waits for any callback in progress.
//!
//! When the provider closes the channel the listener tears the connection
//! down itself and, after the configured grace period, re-registers the
//! same callback on a fresh connection.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::unix::pipe;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bp_protocol::{Command, Opcode, COMMAND_RECORD_LEN};

use crate::client::{Inner, Registration};

/// Callback invoked for every change notification.
///
/// It runs on the listener task; long-running work should be handed off
/// to another task so teardown is not held up.
pub type NotifyCallback = Arc<dyn Fn() + Send + Sync + 'static>;

// ============================================================================
// States
// ============================================================================

/// Why a listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The provider closed the channel or sent something other than a
    /// change notification.
    PeerClosed,
    /// Reading the channel failed.
    IoFailure,
    /// The client stopped the listener.
    Cancelled,
}

/// Observable listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Idle,
    Listening,
    Delivering,
    Stopped(ListenerExit),
}

/// State shared by every listener a client spawns. Only the most recently
/// spawned listener publishes, so a cancelled listener that winds down
/// late cannot overwrite its successor's state.
#[derive(Debug)]
pub(crate) struct StateBoard {
    sender: watch::Sender<ListenerState>,
    latest: AtomicU64,
}

impl StateBoard {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(ListenerState::Idle);
        Self {
            sender,
            latest: AtomicU64::new(0),
        }
    }

    pub(crate) fn current(&self) -> ListenerState {
        *self.sender.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.sender.subscribe()
    }

    /// Hands the board to a new listener and silences all earlier ones.
    pub(crate) fn claim(self: &Arc<Self>) -> StatePublisher {
        let mut epoch = 0;
        // Bumped under the channel's write lock so it orders with publish.
        self.sender.send_if_modified(|_| {
            epoch = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        StatePublisher {
            board: self.clone(),
            epoch,
        }
    }
}

/// One listener's right to publish on a [`StateBoard`].
#[derive(Debug)]
pub(crate) struct StatePublisher {
    board: Arc<StateBoard>,
    epoch: u64,
}

impl StatePublisher {
    fn publish(&self, next: ListenerState) {
        let latest = &self.board.latest;
        self.board.sender.send_if_modified(|state| {
            if latest.load(Ordering::SeqCst) != self.epoch || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owned by the connection the listener is bound to.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<ListenerExit>,
}

impl ListenerHandle {
    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Requests a stop at the top of the next read. Idempotent.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the task, which includes any callback in progress.
    pub(crate) async fn join(self) -> Option<ListenerExit> {
        match self.task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(error = %e, "Notification listener task failed");
                None
            }
        }
    }
}

/// Everything the listener task needs besides its channel.
pub(crate) struct ListenerContext {
    pub(crate) client: Weak<Inner>,
    pub(crate) generation: u64,
    pub(crate) cid: i64,
    pub(crate) registration: Registration,
    pub(crate) state: StatePublisher,
    pub(crate) grace: Option<Duration>,
}

// ============================================================================
// Channel
// ============================================================================

/// Creates the FIFO at `path` if needed and opens its read side.
pub(crate) fn open_channel(path: &Path) -> io::Result<pipe::Receiver> {
    ensure_fifo(path)?;
    pipe::OpenOptions::new().open_receiver(path)
}

fn ensure_fifo(path: &Path) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a FIFO", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let c_path = CString::new(path.as_os_str().as_bytes())?;
            // SAFETY: c_path is a valid NUL-terminated string that outlives the call.
            let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
            if rc != 0 {
                let err = io::Error::last_os_error();
                // Lost a race with the provider creating it.
                if err.kind() != io::ErrorKind::AlreadyExists {
                    return Err(err);
                }
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Removes the FIFO left behind by a connection. Missing files are fine.
pub(crate) fn remove_channel(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "Failed to remove notification channel");
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Spawns the listener. Must be called from within a tokio runtime.
pub(crate) fn spawn(receiver: pipe::Receiver, ctx: ListenerContext) -> ListenerHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(receiver, ctx, cancel.clone()));
    ListenerHandle { cancel, task }
}

async fn run(
    mut receiver: pipe::Receiver,
    ctx: ListenerContext,
    cancel: CancellationToken,
) -> ListenerExit {
    debug!(cid = ctx.cid, generation = ctx.generation, "Notification listener started");
    let exit = listen(&mut receiver, &ctx.registration.callback, &ctx.state, &cancel).await;
    drop(receiver);
    ctx.state.publish(ListenerState::Stopped(exit));
    info!(cid = ctx.cid, ?exit, "Notification listener stopped");

    if exit != ListenerExit::PeerClosed || cancel.is_cancelled() {
        return exit;
    }

    // The provider went away: this task, not a caller, tears down.
    let Some(inner) = ctx.client.upgrade() else {
        return exit;
    };
    inner.teardown_generation(ctx.generation).await;
    drop(inner);

    if let Some(grace) = ctx.grace {
        sleep(grace).await;
        if let Some(inner) = ctx.client.upgrade() {
            inner.reinstall(&ctx.registration).await;
        }
    }
    exit
}

/// Reads records until cancelled, the peer closes, or a read fails.
pub(crate) async fn listen<R>(
    receiver: &mut R,
    callback: &NotifyCallback,
    state: &StatePublisher,
    cancel: &CancellationToken,
) -> ListenerExit
where
    R: AsyncRead + Unpin,
{
    state.publish(ListenerState::Listening);
    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ListenerExit::Cancelled,
            record = read_record(receiver) => record,
        };

        let buf = match record {
            Ok(Some(buf)) => buf,
            Ok(None) => return ListenerExit::PeerClosed,
            Err(e) => {
                warn!(error = %e, "Notification channel read failed");
                return ListenerExit::IoFailure;
            }
        };

        match Command::decode(&buf) {
            Ok(cmd) if cmd.opcode == Opcode::CommonNoti => {
                state.publish(ListenerState::Delivering);
                debug!(id = cmd.id, "Delivering change notification");
                callback();
                state.publish(ListenerState::Listening);
            }
            Ok(cmd) => {
                warn!(opcode = %cmd.opcode, "Unexpected opcode on notification channel");
                return ListenerExit::PeerClosed;
            }
            Err(e) => {
                warn!(error = %e, "Undecodable record on notification channel");
                return ListenerExit::PeerClosed;
            }
        }
    }
}

/// One record, `None` on a clean end of stream between records.
async fn read_record<R>(reader: &mut R) -> io::Result<Option<[u8; COMMAND_RECORD_LEN]>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; COMMAND_RECORD_LEN];
    let mut filled = 0;
    while filled < COMMAND_RECORD_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("notification record truncated after {filled} bytes"),
            ));
        }
        filled += n;
    }
    Ok(Some(buf))
}
