//! The link IO task: single owner of the transport, single consumer of
//! inbound frames.
//!
//! All host/device traffic is multiplexed through one spawned task. Requests
//! arrive on an `mpsc` channel and are answered through `oneshot` replies;
//! because the task processes one request at a time, the channel queue *is*
//! the mutual exclusion that keeps at most one transaction in flight on the
//! wire -- the protocol has no correlation token, so answers are matched to
//! requests purely by that exclusivity. A second concurrent caller waits in
//! the queue; it is never rejected.
//!
//! Inbound frames are classified in two branches: frames whose command has a
//! registered listener are delivered there (and never treated as an answer);
//! any other frame is the answer to the pending transaction, or -- with no
//! transaction pending -- is dropped.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use esb_bridge_core::error::{Error, Result};
use esb_bridge_core::transport::Transport;

use crate::frame::{self, FRAME_SIZE, Frame, MAX_PAYLOAD_LEN};

/// Default time to wait for the answer to a transaction.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(500);

/// Default raw read timeout for one idle receive attempt. Independent of
/// the transaction timeout; only paces the idle loop.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Configuration for the link IO task.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Timeout for a single request/answer transaction.
    pub transfer_timeout: Duration,
    /// Timeout for one raw read attempt in the idle loop.
    pub read_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// The device's answer to a transaction: the status byte and the answer
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Status byte from the answer frame. Zero is success; any other value
    /// is a firmware-defined error code.
    pub status: u8,
    /// Answer payload.
    pub payload: Vec<u8>,
}

/// A request sent from callers to the IO task.
enum Request {
    /// Send a frame and wait for the correlated answer.
    Transfer {
        cmd: u8,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Answer>>,
    },
    /// Send a frame without waiting for an answer.
    Send {
        cmd: u8,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Register a listener for inbound frames with the given command.
    Listen {
        cmd: u8,
        sink: mpsc::Sender<Frame>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Graceful shutdown; returns the transport for test recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// A registered inbound-frame listener.
struct LinkListener {
    cmd: u8,
    sink: mpsc::Sender<Frame>,
    /// Frames dropped because the sink was full.
    dropped: u64,
}

/// Handle to the link IO task.
pub struct LinkIo {
    cmd_tx: mpsc::Sender<Request>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
    /// Join handle for the IO task.
    pub task: JoinHandle<()>,
}

impl LinkIo {
    /// Send a request frame and wait for the correlated answer.
    ///
    /// `timeout` must match the `transfer_timeout` the task was spawned
    /// with; it is used here only as a safety net around the reply channel.
    pub async fn transfer(&self, cmd: u8, payload: Vec<u8>, timeout: Duration) -> Result<Answer> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidSize);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Transfer {
                cmd,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        // Safety-net timeout: transfer_timeout + 500ms for queueing and
        // channel overhead. The IO task enforces the real deadline.
        match tokio::time::timeout(timeout + Duration::from_millis(500), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Send a fire-and-forget frame. Returns as soon as the frame has been
    /// written to the link; no answer is expected or read.
    pub async fn send(&self, cmd: u8, payload: Vec<u8>) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidSize);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Send {
                cmd,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Register `sink` to receive every inbound frame carrying `cmd`.
    ///
    /// A command with a listener is claimed by that listener on arrival and
    /// can no longer serve as a transaction answer -- use disjoint command
    /// identifiers for the two kinds of traffic. Delivery is non-blocking:
    /// frames for a full sink are dropped (and counted), and a closed sink
    /// unregisters the listener.
    pub async fn listen(&self, cmd: u8, sink: mpsc::Sender<Frame>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Listen {
                cmd,
                sink,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

/// Spawn the link IO task. The task owns the transport exclusively until
/// shutdown or cancellation.
pub fn spawn_link_io(transport: Box<dyn Transport>, config: LinkConfig) -> LinkIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let task = tokio::spawn(link_io_loop(transport, config, cmd_rx, cancel_clone));

    LinkIo {
        cmd_tx,
        cancel,
        task,
    }
}

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Request dispatch (transfers, sends, listener registration)
/// 3. Idle inbound frame reading
async fn link_io_loop(
    mut transport: Box<dyn Transport>,
    config: LinkConfig,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut listeners: Vec<LinkListener> = Vec::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("link IO task cancelled");
                break;
            }

            req = cmd_rx.recv() => {
                match req {
                    Some(Request::Transfer { cmd, payload, reply }) => {
                        let result = execute_transfer(
                            &mut *transport,
                            cmd,
                            &payload,
                            &config,
                            &mut listeners,
                        ).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Send { cmd, payload, reply }) => {
                        let result = execute_send(&mut *transport, cmd, &payload).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Listen { cmd, sink, reply }) => {
                        debug!(cmd = format_args!("0x{cmd:02X}"), "registering frame listener");
                        listeners.push(LinkListener { cmd, sink, dropped: 0 });
                        let _ = reply.send(Ok(()));
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("link IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("all request senders dropped, exiting link IO task");
                        break;
                    }
                }
            }

            // Idle: read device-initiated frames.
            _ = async {
                match read_frame(&mut *transport, config.read_timeout).await {
                    ReadOutcome::Frame(f) => {
                        if !deliver_to_listeners(&mut listeners, &f) {
                            debug!(
                                cmd = format_args!("0x{:02X}", f.cmd),
                                "dropping unsolicited frame with no pending transaction"
                            );
                        }
                    }
                    ReadOutcome::Discarded => {}
                    ReadOutcome::Silence => {}
                    ReadOutcome::Failed => {
                        // Keep the loop from spinning hot on a dead port;
                        // requests and cancellation still preempt the sleep.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            } => {}
        }
    }
}

/// Outcome of one raw read attempt.
enum ReadOutcome {
    /// A validated frame.
    Frame(Frame),
    /// Bytes arrived but were not a valid frame; they have been discarded.
    Discarded,
    /// The read timed out with no data.
    Silence,
    /// The transport reported an error.
    Failed,
}

/// Read one frame's worth of bytes and validate it.
///
/// A read that does not yield exactly [`FRAME_SIZE`] bytes, or whose sync
/// byte or checksum is wrong, is discarded without surfacing an error --
/// expected noise on a physical link, not actionable by any caller.
async fn read_frame(transport: &mut dyn Transport, timeout: Duration) -> ReadOutcome {
    let mut buf = [0u8; FRAME_SIZE];
    match transport.receive(&mut buf, timeout).await {
        Ok(n) if n == FRAME_SIZE => match frame::decode_frame(&buf) {
            Some(f) => ReadOutcome::Frame(f),
            None => {
                trace!("discarding frame: bad sync or checksum");
                ReadOutcome::Discarded
            }
        },
        Ok(n) => {
            trace!(bytes = n, "discarding partial read");
            ReadOutcome::Discarded
        }
        Err(Error::Timeout) => ReadOutcome::Silence,
        Err(e) => {
            trace!(error = %e, "read failed");
            ReadOutcome::Failed
        }
    }
}

/// Offer `frame` to every listener registered for its command.
///
/// Returns `true` if any listener claimed the command (even if its sink was
/// full -- a claimed command is never an answer). Full sinks drop the frame;
/// closed sinks are unregistered.
fn deliver_to_listeners(listeners: &mut Vec<LinkListener>, frame: &Frame) -> bool {
    let mut claimed = false;
    listeners.retain_mut(|l| {
        if l.cmd != frame.cmd {
            return true;
        }
        claimed = true;
        match l.sink.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                l.dropped += 1;
                warn!(
                    cmd = format_args!("0x{:02X}", l.cmd),
                    dropped = l.dropped,
                    "listener sink full, dropping frame"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    cmd = format_args!("0x{:02X}", l.cmd),
                    "listener sink closed, unregistering"
                );
                false
            }
        }
    });
    claimed
}

/// Write one fire-and-forget frame.
async fn execute_send(transport: &mut dyn Transport, cmd: u8, payload: &[u8]) -> Result<()> {
    let bytes = frame::encode_frame(cmd, payload)?;
    transport.send(&bytes).await
}

/// Execute one request/answer transaction on the transport.
///
/// Writes the request frame, then reads until the deadline. Frames claimed
/// by a listener are delivered and the wait continues; invalid reads are
/// discarded. The first unclaimed frame is taken as the answer: its command
/// must equal the request's or the transaction fails with
/// [`Error::CommandMismatch`].
async fn execute_transfer(
    transport: &mut dyn Transport,
    cmd: u8,
    payload: &[u8],
    config: &LinkConfig,
    listeners: &mut Vec<LinkListener>,
) -> Result<Answer> {
    let bytes = frame::encode_frame(cmd, payload)?;
    transport.send(&bytes).await?;

    let deadline = Instant::now() + config.transfer_timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }

        match read_frame(transport, remaining).await {
            ReadOutcome::Frame(f) => {
                if deliver_to_listeners(listeners, &f) {
                    continue;
                }
                if f.cmd != cmd {
                    debug!(
                        expected = format_args!("0x{cmd:02X}"),
                        actual = format_args!("0x{:02X}", f.cmd),
                        "answer command mismatch"
                    );
                    return Err(Error::CommandMismatch {
                        expected: cmd,
                        actual: f.cmd,
                    });
                }
                return Ok(Answer {
                    status: f.status,
                    payload: f.payload,
                });
            }
            ReadOutcome::Discarded => continue,
            ReadOutcome::Silence => return Err(Error::Timeout),
            ReadOutcome::Failed => return Err(Error::Transport("read failed during transfer".into())),
        }
    }
}
