//! Mock transport for deterministic testing of the link engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/answer exchanges and an injection channel for device-initiated
//! frames. This lets you test frame encoding, answer correlation, timeout
//! behavior, and listener fan-out without real hardware.
//!
//! # Example
//!
//! ```
//! use esb_bridge_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the link engine writes this request, make these reads available.
//! mock.expect(&[0x69, 0x61, 0x00, 0x00], &[&[0x69, 0x61, 0x00, 0x01]]);
//!
//! // Device-initiated traffic is injected out-of-band.
//! let injector = mock.injector();
//! injector.inject(&[0x69, 0x81, 0x00, 0x06]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

use esb_bridge_core::error::{Error, Result};
use esb_bridge_core::transport::Transport;

/// A pre-loaded exchange: the request bytes we expect to be written and the
/// reads to make available afterwards.
#[derive(Debug, Clone)]
struct Exchange {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// Buffers returned by subsequent `receive()` calls, one per call.
    /// May be empty (no answer -- a timeout script) and entries may be
    /// shorter than a frame (a torn read script).
    responses: Vec<Vec<u8>>,
}

/// Handle for injecting device-initiated frames into a [`MockTransport`].
///
/// Cloneable and usable after the transport has been boxed away into the
/// link IO task. Injected buffers surface through `receive()` exactly like
/// frames arriving on the wire.
#[derive(Debug, Clone)]
pub struct FrameInjector {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl FrameInjector {
    /// Queue `frame` for delivery on a future `receive()` call.
    pub fn inject(&self, frame: &[u8]) {
        // Ignore a dropped transport; the test is tearing down.
        let _ = self.tx.send(frame.to_vec());
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Exchanges are matched by request bytes, not by order: the link engine
/// serializes concurrent callers internally, so a test may spawn several
/// callers without knowing which reaches the transport first. Each
/// exchange is consumed once.
///
/// If no exchange matches a written request, an error is returned.
#[derive(Debug)]
pub struct MockTransport {
    /// Pending scripted exchanges.
    exchanges: VecDeque<Exchange>,
    /// Reads waiting to be consumed, oldest first.
    rx_queue: VecDeque<Vec<u8>>,
    /// Injection channel (sender kept so the channel never closes).
    injected_tx: mpsc::UnboundedSender<Vec<u8>>,
    injected_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all buffers written through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        let (injected_tx, injected_rx) = mpsc::unbounded_channel();
        MockTransport {
            exchanges: VecDeque::new(),
            rx_queue: VecDeque::new(),
            injected_tx,
            injected_rx,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Script an exchange: when `request` is written, the buffers in
    /// `responses` become available to `receive()`, one buffer per call.
    ///
    /// Pass an empty `responses` slice to script a device that never
    /// answers (timeout testing); pass short buffers to script torn reads.
    pub fn expect(&mut self, request: &[u8], responses: &[&[u8]]) {
        self.exchanges.push_back(Exchange {
            request: request.to_vec(),
            responses: responses.iter().map(|r| r.to_vec()).collect(),
        });
    }

    /// Obtain an injector handle for device-initiated frames.
    pub fn injector(&self) -> FrameInjector {
        FrameInjector {
            tx: self.injected_tx.clone(),
        }
    }

    /// All buffers written through this transport, one per `send()` call.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Number of scripted exchanges not yet consumed.
    pub fn remaining_exchanges(&self) -> usize {
        self.exchanges.len()
    }

    /// Set the connected state.
    ///
    /// When `false`, subsequent `send()` and `receive()` calls return
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data.to_vec());

        let exchange = self
            .exchanges
            .iter()
            .position(|e| e.request.as_slice() == data)
            .and_then(|idx| self.exchanges.remove(idx));
        match exchange {
            Some(exchange) => {
                self.rx_queue.extend(exchange.responses);
                Ok(())
            }
            None => Err(Error::Protocol(format!(
                "unexpected send data: {data:02X?}"
            ))),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        // Injected frames queue behind any scripted reads already pending.
        while let Ok(f) = self.injected_rx.try_recv() {
            self.rx_queue.push_back(f);
        }

        let data = match self.rx_queue.pop_front() {
            Some(data) => data,
            None => match tokio::time::timeout(timeout, self.injected_rx.recv()).await {
                Ok(Some(data)) => data,
                Ok(None) | Err(_) => return Err(Error::Timeout),
            },
        };

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.rx_queue.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
