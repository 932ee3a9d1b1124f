use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{encode_close_payload, CloseFrame, OpCode};
use crate::keepalive;
use crate::read::ReadState;
use crate::stream::SocketWireStream;
use crate::write::{WireWriter, WriterKind};
use log::debug;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;

/// State shared between every clone of a connection handle and its
/// keepalive task.
///
/// The writer mutex is the single serialization point for wire bytes: it
/// is held from the first header byte of a frame through the flush of its
/// payload, so frames can never interleave. The access flags sit on top
/// of it and catch concurrent misuse of the data/control paths, which the
/// mutex alone would silently serialize into a corrupt frame sequence.
pub(crate) struct Shared {
    pub(crate) reader: Mutex<ReadState>,
    pub(crate) writer: Mutex<WireWriter>,
    pub(crate) data_sender: AccessFlag,
    pub(crate) control_sender: AccessFlag,
    pub(crate) data_receiver: AccessFlag,
    pub(crate) closed: CloseNotifier,
    pub(crate) close_sent: AtomicBool,
    pub(crate) last_pong: AtomicU32,
    pub(crate) peer_close: Mutex<Option<CloseFrame>>,
    pub(crate) expose_pongs: bool,
    subprotocol: Option<String>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Latches the close notifier and shuts the write half down so the
    /// peer's blocked read wakes up. Safe to call repeatedly and from any
    /// task, including the keepalive loop.
    pub(crate) async fn shutdown_stream(&self) {
        self.closed.fire();
        // If a writer is mid-frame the shutdown is skipped; that writer
        // will observe the notifier on its next suspension point and the
        // socket goes down when the last handle is dropped.
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
        }
    }
}

/// A websocket connection. Cloning yields another handle onto the same
/// connection, which is how one task can sit in a receive loop while
/// another sends.
///
/// Connections are created by [`crate::handshake::connect_async`] on the
/// client side and [`crate::handshake::accept_async`] on the server side.
#[derive(Clone)]
pub struct WSConnection {
    pub(crate) shared: Arc<Shared>,
}

impl WSConnection {
    pub(crate) fn from_parts(
        reader: BufReader<ReadHalf<SocketWireStream>>,
        writer: BufWriter<WriteHalf<SocketWireStream>>,
        kind: WriterKind,
        subprotocol: Option<String>,
        config: WebSocketConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            reader: Mutex::new(ReadState::new(reader)),
            writer: Mutex::new(WireWriter::new(writer, kind)),
            data_sender: AccessFlag::new("data send"),
            control_sender: AccessFlag::new("control send"),
            data_receiver: AccessFlag::new("data receive"),
            closed: CloseNotifier::new(),
            close_sent: AtomicBool::new(false),
            last_pong: AtomicU32::new(0),
            peer_close: Mutex::new(None),
            expose_pongs: config.expose_pong_frames,
            subprotocol,
            keepalive: Mutex::new(None),
        });

        let (interval, strikes) = config.keepalive_params();
        let handle = keepalive::spawn(Arc::downgrade(&shared), interval, strikes);
        if let Ok(mut slot) = shared.keepalive.try_lock() {
            *slot = Some(handle);
        }

        WSConnection { shared }
    }

    /// The subprotocol agreed on during the handshake, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.shared.subprotocol.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_closed()
    }

    /// The close frame the peer sent, once one has been received.
    pub async fn peer_close_frame(&self) -> Option<CloseFrame> {
        self.shared.peer_close.lock().await.clone()
    }

    /// Starts a graceful close: sends a close frame with the given status
    /// code and reason, then waits until the peer's acknowledgement has
    /// been processed by the receive loop, or until `deadline` passes.
    ///
    /// The reason is truncated to fit the control frame limit. On timeout
    /// the connection is forcefully closed and `CloseTimeout` returned.
    /// Somebody must be driving the receive side for the acknowledgement
    /// to be noticed.
    pub async fn close(&self, deadline: Duration, code: u16, reason: &str) -> Result<(), Error> {
        let shared = &*self.shared;
        if shared.closed.is_closed() || shared.close_sent.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed);
        }

        {
            let _slot = shared.data_sender.acquire();
            let mut writer = lock_writer_or_closed(shared).await?;
            let payload = encode_close_payload(code, reason);
            let sent = race_closed(
                &shared.closed,
                writer.write_whole_frame(true, OpCode::Close, &payload),
            )
            .await;
            // Mark the close as ours before releasing the writer, so the
            // receive path can never mistake the peer's echo for a
            // peer-initiated close.
            match sent {
                Ok(()) => shared.close_sent.store(true, Ordering::Release),
                Err(err) => {
                    drop(writer);
                    shared.shutdown_stream().await;
                    return Err(err);
                }
            }
        }

        debug!("close frame sent with code {code}, waiting for the peer");
        match tokio::time::timeout(deadline, shared.closed.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.force_close().await;
                Err(Error::CloseTimeout)
            }
        }
    }

    /// Tears the connection down immediately: fires the closed notifier,
    /// shuts the stream and joins the keepalive task. Idempotent, and
    /// callable from any task. In-flight operations fail `AlreadyClosed`.
    pub async fn force_close(&self) {
        self.shared.shutdown_stream().await;
        let handle = self.shared.keepalive.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// One-shot broadcast for "this connection has ended". Firing wakes every
/// current and future waiter.
pub(crate) struct CloseNotifier {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseNotifier {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn fire(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag, otherwise a fire() landing
        // between the check and the await would be missed.
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

/// Concurrent-access detector for the send and receive paths. This is not
/// a lock: two tasks entering the same path at once is a bug in the
/// calling code, and silently queueing them would corrupt the peer's view
/// of the stream, so the second caller panics instead.
pub(crate) struct AccessFlag {
    name: &'static str,
    busy: AtomicBool,
}

impl AccessFlag {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            busy: AtomicBool::new(false),
        }
    }

    pub(crate) fn acquire(&self) -> AccessGuard<'_> {
        if self.busy.swap(true, Ordering::Acquire) {
            panic!("concurrent {} on the same websocket connection", self.name);
        }
        AccessGuard { flag: self }
    }
}

pub(crate) struct AccessGuard<'a> {
    flag: &'a AccessFlag,
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.flag.busy.store(false, Ordering::Release);
    }
}

/// Waits for the writer mutex, bailing out if the connection is torn
/// down first. Every producer of wire bytes queues through here, so a
/// frame in flight can never leave later senders stuck past a close.
pub(crate) async fn lock_writer_or_closed(shared: &Shared) -> Result<MutexGuard<'_, WireWriter>, Error> {
    tokio::select! {
        biased;
        _ = shared.closed.wait() => Err(Error::AlreadyClosed),
        writer = shared.writer.lock() => Ok(writer),
    }
}

/// Runs an I/O future against the closed notifier, so blocked operations
/// unblock the moment the connection is torn down. Errors surfacing after
/// the notifier fired are reported as `AlreadyClosed` rather than as the
/// underlying (and usually misleading) I/O error.
pub(crate) async fn race_closed<T, E, F>(closed: &CloseNotifier, io: F) -> Result<T, Error>
where
    E: Into<Error>,
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = closed.wait() => Err(Error::AlreadyClosed),
        result = io => result.map_err(|err| {
            if closed.is_closed() {
                Error::AlreadyClosed
            } else {
                err.into()
            }
        }),
    }
}
