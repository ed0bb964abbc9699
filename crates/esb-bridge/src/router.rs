//! Envelope router: fans asynchronous inbound radio messages out to
//! filtered subscribers.
//!
//! The link IO task delivers every `CMD_RX` frame into this router's queue.
//! The router decodes the ESB envelope (5-byte source address, command
//! byte, payload) and offers the message to every listener whose filter
//! matches -- matching is not exclusive, one envelope may reach many
//! listeners. Delivery is strictly non-blocking: a listener that is not
//! draining its stream loses messages (drop-on-full), and a listener whose
//! stream has been dropped is unregistered on the next matching delivery.
//! One stalled subscriber can therefore never stall the others or the
//! serial read loop.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use esb_bridge_core::error::{Error, Result};
use esb_bridge_core::message::{ADDRESS_SIZE, EsbAddress, EsbMessage, ListenFilter};
use esb_bridge_usb::Frame;

/// A registered listener: filter plus delivery sink.
struct RouterListener {
    filter: ListenFilter,
    sink: mpsc::Sender<EsbMessage>,
    /// Messages dropped because the sink was full.
    dropped: u64,
}

/// A subscription request sent to the router task.
pub(crate) struct Subscribe {
    pub filter: ListenFilter,
    pub sink: mpsc::Sender<EsbMessage>,
    pub reply: oneshot::Sender<Result<()>>,
}

/// Handle to the router task.
pub(crate) struct RouterHandle {
    sub_tx: mpsc::Sender<Subscribe>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
    /// Join handle for the router task.
    pub task: JoinHandle<()>,
}

impl RouterHandle {
    /// Register a new listener.
    pub(crate) async fn subscribe(
        &self,
        filter: ListenFilter,
        sink: mpsc::Sender<EsbMessage>,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sub_tx
            .send(Subscribe {
                filter,
                sink,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }
}

/// Spawn the router task consuming `frame_rx`, the `CMD_RX` listener
/// channel registered with the link IO task.
pub(crate) fn spawn_router(frame_rx: mpsc::Receiver<Frame>) -> RouterHandle {
    let (sub_tx, sub_rx) = mpsc::channel::<Subscribe>(16);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let task = tokio::spawn(router_loop(frame_rx, sub_rx, cancel_clone));

    RouterHandle {
        sub_tx,
        cancel,
        task,
    }
}

/// The router loop: one task, consuming subscriptions and inbound frames
/// in arrival order so registrations never interleave with a dispatch.
async fn router_loop(
    mut frame_rx: mpsc::Receiver<Frame>,
    mut sub_rx: mpsc::Receiver<Subscribe>,
    cancel: CancellationToken,
) {
    let mut listeners: Vec<RouterListener> = Vec::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("router task cancelled");
                break;
            }

            sub = sub_rx.recv() => {
                match sub {
                    Some(Subscribe { filter, sink, reply }) => {
                        debug!(
                            address = %filter.address,
                            cmd = format_args!("0x{:02X}", filter.cmd),
                            "registering envelope listener"
                        );
                        listeners.push(RouterListener { filter, sink, dropped: 0 });
                        let _ = reply.send(Ok(()));
                    }
                    None => {
                        debug!("all subscription senders dropped, exiting router task");
                        break;
                    }
                }
            }

            frame = frame_rx.recv() => {
                match frame {
                    Some(f) => dispatch_envelope(&mut listeners, &f),
                    None => {
                        debug!("link frame channel closed, exiting router task");
                        break;
                    }
                }
            }
        }
    }
}

/// Decode the ESB envelope carried in an async inbound frame's payload.
///
/// Returns `None` for payloads shorter than an address plus command byte;
/// such frames are malformed and dropped without error propagation.
fn decode_envelope(frame: &Frame) -> Option<EsbMessage> {
    if frame.payload.len() < ADDRESS_SIZE + 1 {
        return None;
    }
    let source = EsbAddress::try_from(&frame.payload[..ADDRESS_SIZE]).ok()?;
    Some(EsbMessage {
        source,
        cmd: frame.payload[ADDRESS_SIZE],
        payload: frame.payload[ADDRESS_SIZE + 1..].to_vec(),
    })
}

/// Deliver one inbound frame's envelope to every matching listener.
fn dispatch_envelope(listeners: &mut Vec<RouterListener>, frame: &Frame) {
    let Some(msg) = decode_envelope(frame) else {
        debug!(
            payload_len = frame.payload.len(),
            "dropping malformed envelope"
        );
        return;
    };

    listeners.retain_mut(|l| {
        if !l.filter.matches(&msg) {
            return true;
        }
        match l.sink.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                l.dropped += 1;
                warn!(
                    address = %l.filter.address,
                    cmd = format_args!("0x{:02X}", l.filter.cmd),
                    dropped = l.dropped,
                    "listener stream full, dropping message"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    address = %l.filter.address,
                    cmd = format_args!("0x{:02X}", l.filter.cmd),
                    "listener stream dropped, unregistering"
                );
                false
            }
        }
    });
}
