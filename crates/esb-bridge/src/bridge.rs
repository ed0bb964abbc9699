//! The bridge gateway: the API many independent clients call concurrently.
//!
//! [`EsbBridge`] is the connection object. It owns the link IO task (which
//! owns the serial transport) and the envelope router, and is the sole
//! place where ESB-level semantics -- target addressing, the 32-byte radio
//! payload ceiling, firmware status codes -- are applied on top of the raw
//! link protocol.
//!
//! Concurrent [`transfer`](EsbBridge::transfer) calls are serialized by the
//! link IO task's request queue; callers wait their turn, they are never
//! rejected. Subscriptions created with [`listen`](EsbBridge::listen) are
//! independent bounded streams fed by the router; dropping a stream cancels
//! its subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use esb_bridge_core::error::{Error, Result};
use esb_bridge_core::message::{EsbAddress, EsbMessage, ListenFilter};
use esb_bridge_usb::LinkIo;

use crate::router::RouterHandle;

/// Get the bridge firmware version.
pub const CMD_VERSION: u8 = 0x10;

/// Send an ESB message to a peer and wait for its reply.
pub const CMD_TRANSFER: u8 = 0x30;

/// Send an ESB message to a peer without waiting for a reply.
pub const CMD_SEND: u8 = 0x31;

/// Maximum ESB message payload. The limit comes from the ESB protocol
/// implementation on the bridge's nRF52 radio, not from the USB link
/// (whose frames fit 58 bytes).
pub const MAX_ESB_PAYLOAD: usize = 32;

/// Default per-subscription stream capacity.
pub const DEFAULT_LISTEN_CAPACITY: usize = 16;

/// A connection to an ESB bridge device.
///
/// Constructed via [`EsbBridgeBuilder`](crate::builder::EsbBridgeBuilder).
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct EsbBridge {
    link: LinkIo,
    router: RouterHandle,
    transfer_timeout: Duration,
    closed: AtomicBool,
}

impl EsbBridge {
    pub(crate) fn new(link: LinkIo, router: RouterHandle, transfer_timeout: Duration) -> Self {
        EsbBridge {
            link,
            router,
            transfer_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Read the firmware version of the connected bridge device.
    ///
    /// Returns the version as a string in `maj.min.patch` format.
    pub async fn firmware_version(&self) -> Result<String> {
        self.ensure_open()?;

        let answer = self
            .link
            .transfer(CMD_VERSION, Vec::new(), self.transfer_timeout)
            .await?;
        if answer.status != 0 {
            return Err(Error::Device(answer.status));
        }
        if answer.payload.len() < 3 {
            return Err(Error::Protocol(format!(
                "version answer too short: {} bytes",
                answer.payload.len()
            )));
        }

        Ok(format!(
            "{}.{}.{}",
            answer.payload[0], answer.payload[1], answer.payload[2]
        ))
    }

    /// Send an ESB message to `target` and wait for the peer's answer.
    ///
    /// `payload` must be 1 to [`MAX_ESB_PAYLOAD`] bytes; violations fail
    /// with [`Error::InvalidSize`] before anything touches the wire. A
    /// nonzero status in the device's answer surfaces as
    /// [`Error::Device`]; on success the answer payload is returned.
    pub async fn transfer(&self, target: EsbAddress, payload: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        check_esb_payload(payload)?;

        let answer = self
            .link
            .transfer(CMD_TRANSFER, build_envelope(target, payload), self.transfer_timeout)
            .await?;
        if answer.status != 0 {
            debug!(
                target = %target,
                status = format_args!("0x{:02X}", answer.status),
                "ESB transfer failed on the device"
            );
            return Err(Error::Device(answer.status));
        }

        Ok(answer.payload)
    }

    /// Send an ESB message to `target` without waiting for a reply.
    ///
    /// Fire-and-forget: returns once the frame is on the link. Delivery on
    /// the radio side is not acknowledged to the caller.
    pub async fn send(&self, target: EsbAddress, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        check_esb_payload(payload)?;

        self.link.send(CMD_SEND, build_envelope(target, payload)).await
    }

    /// Subscribe to inbound ESB messages matching `filter`.
    ///
    /// Returns a bounded stream of messages (capacity
    /// [`DEFAULT_LISTEN_CAPACITY`]). Messages arriving while the stream is
    /// full are dropped, so consumers must keep draining. Dropping the
    /// stream cancels the subscription: the router unregisters the
    /// listener on its next matching delivery.
    pub async fn listen(&self, filter: ListenFilter) -> Result<mpsc::Receiver<EsbMessage>> {
        self.listen_with_capacity(filter, DEFAULT_LISTEN_CAPACITY).await
    }

    /// Subscribe with an explicit stream capacity.
    ///
    /// Fails with [`Error::InvalidParameter`] for a zero capacity -- a
    /// subscription nobody can deliver into is a programming error.
    pub async fn listen_with_capacity(
        &self,
        filter: ListenFilter,
        capacity: usize,
    ) -> Result<mpsc::Receiver<EsbMessage>> {
        self.ensure_open()?;
        if capacity == 0 {
            return Err(Error::InvalidParameter(
                "listen capacity must be nonzero".into(),
            ));
        }

        let (sink, stream) = mpsc::channel(capacity);
        self.router.subscribe(filter, sink).await?;
        Ok(stream)
    }

    /// Close the connection.
    ///
    /// Idempotent. Stops the router and link tasks and releases the serial
    /// port; every subsequent operation fails fast with
    /// [`Error::NotConnected`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing bridge connection");
        self.router.cancel.cancel();
        self.link.cancel.cancel();
    }
}

impl Drop for EsbBridge {
    fn drop(&mut self) {
        self.close();
        // Safety net: abort in case a task is stuck in a transport read
        // that doesn't observe the cancellation token (e.g. hung USB CDC).
        self.link.task.abort();
        self.router.task.abort();
    }
}

/// Validate the ESB payload bounds (1..=32 bytes).
fn check_esb_payload(payload: &[u8]) -> Result<()> {
    if payload.is_empty() || payload.len() > MAX_ESB_PAYLOAD {
        return Err(Error::InvalidSize);
    }
    Ok(())
}

/// Build the link-level payload for an outbound ESB message: target
/// address followed by the application payload.
fn build_envelope(target: EsbAddress, payload: &[u8]) -> Vec<u8> {
    let mut envelope = Vec::with_capacity(target.as_bytes().len() + payload.len());
    envelope.extend_from_slice(target.as_bytes());
    envelope.extend_from_slice(payload);
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EsbBridgeBuilder;
    use esb_bridge_core::message::CMD_WILDCARD;
    use esb_bridge_test_harness::{FrameInjector, MockTransport};
    use esb_bridge_usb::frame::{CMD_RX, encode_answer_frame, encode_frame};

    const TARGET: EsbAddress = EsbAddress::new([111, 111, 111, 111, 1]);

    /// Build a bridge over a mock transport, returning the injector for
    /// device-initiated frames.
    async fn bridge_with_mock(mock: MockTransport) -> (EsbBridge, FrameInjector) {
        let injector = mock.injector();
        let bridge = EsbBridgeBuilder::new()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        (bridge, injector)
    }

    fn version_exchange(mock: &mut MockTransport, version: &[u8]) {
        let req = encode_frame(CMD_VERSION, &[]).unwrap();
        let ans = encode_answer_frame(CMD_VERSION, 0x00, version).unwrap();
        mock.expect(&req, &[&ans]);
    }

    /// An inbound `CMD_RX` frame carrying an ESB envelope.
    fn rx_frame(source: [u8; 5], cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = source.to_vec();
        p.push(cmd);
        p.extend_from_slice(payload);
        encode_answer_frame(CMD_RX, 0x00, &p).unwrap()
    }

    #[tokio::test]
    async fn firmware_version_formats_three_bytes() {
        let mut mock = MockTransport::new();
        version_exchange(&mut mock, &[1, 2, 3]);

        let (bridge, _) = bridge_with_mock(mock).await;
        assert_eq!(bridge.firmware_version().await.unwrap(), "1.2.3");
    }

    #[tokio::test]
    async fn firmware_version_nonzero_status_is_device_error() {
        let mut mock = MockTransport::new();
        let req = encode_frame(CMD_VERSION, &[]).unwrap();
        let ans = encode_answer_frame(CMD_VERSION, 0x02, &[]).unwrap();
        mock.expect(&req, &[&ans]);

        let (bridge, _) = bridge_with_mock(mock).await;
        let result = bridge.firmware_version().await;
        assert!(matches!(result, Err(Error::Device(0x02))));
    }

    #[tokio::test]
    async fn transfer_builds_envelope_and_returns_answer_payload() {
        let mut mock = MockTransport::new();

        // Request: target address followed by the application payload.
        let mut envelope = TARGET.as_bytes().to_vec();
        envelope.extend_from_slice(&[0x10]);
        let req = encode_frame(CMD_TRANSFER, &envelope).unwrap();
        let ans = encode_answer_frame(CMD_TRANSFER, 0x00, &[5, 4, 3, 2, 1]).unwrap();
        mock.expect(&req, &[&ans]);

        let (bridge, _) = bridge_with_mock(mock).await;
        let answer = bridge.transfer(TARGET, &[0x10]).await.unwrap();
        assert_eq!(answer, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn transfer_device_error_status_surfaces() {
        let mut mock = MockTransport::new();

        let mut envelope = TARGET.as_bytes().to_vec();
        envelope.extend_from_slice(&[0x10]);
        let req = encode_frame(CMD_TRANSFER, &envelope).unwrap();
        let ans = encode_answer_frame(CMD_TRANSFER, 0x13, &[]).unwrap();
        mock.expect(&req, &[&ans]);

        let (bridge, _) = bridge_with_mock(mock).await;
        let result = bridge.transfer(TARGET, &[0x10]).await;
        assert!(matches!(result, Err(Error::Device(0x13))));
    }

    #[tokio::test]
    async fn transfer_rejects_out_of_bounds_payloads_before_sending() {
        // No exchanges scripted: if a frame were written, the mock would
        // fail the transfer with a protocol error instead of InvalidSize.
        let (bridge, _) = bridge_with_mock(MockTransport::new()).await;

        let result = bridge.transfer(TARGET, &[]).await;
        assert!(matches!(result, Err(Error::InvalidSize)));

        let result = bridge.transfer(TARGET, &[0u8; MAX_ESB_PAYLOAD + 1]).await;
        assert!(matches!(result, Err(Error::InvalidSize)));

        // The boundary values are accepted as far as size checking goes.
        let result = bridge.transfer(TARGET, &[0u8; MAX_ESB_PAYLOAD]).await;
        assert!(!matches!(result, Err(Error::InvalidSize)));
    }

    #[tokio::test]
    async fn send_is_fire_and_forget() {
        let mut mock = MockTransport::new();

        let mut envelope = TARGET.as_bytes().to_vec();
        envelope.extend_from_slice(&[0xAB, 0xCD]);
        let req = encode_frame(CMD_SEND, &envelope).unwrap();
        mock.expect(&req, &[]);

        let (bridge, _) = bridge_with_mock(mock).await;
        bridge.send(TARGET, &[0xAB, 0xCD]).await.unwrap();
    }

    #[tokio::test]
    async fn listen_streams_matching_messages() {
        let (bridge, injector) = bridge_with_mock(MockTransport::new()).await;

        let mut stream = bridge
            .listen(ListenFilter::new(EsbAddress::WILDCARD, 0x05))
            .await
            .unwrap();

        injector.inject(&rx_frame([1, 2, 3, 4, 5], 0x05, &[0xAA]));
        injector.inject(&rx_frame([1, 2, 3, 4, 5], 0x06, &[0xBB]));
        injector.inject(&rx_frame([9, 9, 9, 9, 9], 0x05, &[0xCC]));

        let first = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.source, EsbAddress::new([1, 2, 3, 4, 5]));
        assert_eq!(first.payload, vec![0xAA]);

        // The 0x06 message is filtered out; the next delivery is 0xCC.
        let second = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.payload, vec![0xCC]);
    }

    #[tokio::test]
    async fn listen_by_source_address() {
        let (bridge, injector) = bridge_with_mock(MockTransport::new()).await;

        let mut stream = bridge
            .listen(ListenFilter::new(
                EsbAddress::new([1, 2, 3, 4, 5]),
                CMD_WILDCARD,
            ))
            .await
            .unwrap();

        injector.inject(&rx_frame([1, 2, 3, 4, 6], 0x01, &[0x01]));
        injector.inject(&rx_frame([1, 2, 3, 4, 5], 0x02, &[0x02]));

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.cmd, 0x02);
    }

    #[tokio::test]
    async fn listen_zero_capacity_is_invalid() {
        let (bridge, _) = bridge_with_mock(MockTransport::new()).await;

        let result = bridge.listen_with_capacity(ListenFilter::any(), 0).await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn operations_after_close_fail_fast() {
        let (bridge, _) = bridge_with_mock(MockTransport::new()).await;

        bridge.close();
        bridge.close(); // idempotent

        assert!(matches!(
            bridge.transfer(TARGET, &[0x01]).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            bridge.send(TARGET, &[0x01]).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            bridge.firmware_version().await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            bridge.listen(ListenFilter::any()).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn concurrent_transfers_complete_without_cross_delivery() {
        let mut mock = MockTransport::new();

        let target_a = EsbAddress::new([1, 1, 1, 1, 1]);
        let target_b = EsbAddress::new([2, 2, 2, 2, 2]);

        let mut env_a = target_a.as_bytes().to_vec();
        env_a.push(0xA0);
        let mut env_b = target_b.as_bytes().to_vec();
        env_b.push(0xB0);

        let req_a = encode_frame(CMD_TRANSFER, &env_a).unwrap();
        let ans_a = encode_answer_frame(CMD_TRANSFER, 0x00, &[0xA1]).unwrap();
        let req_b = encode_frame(CMD_TRANSFER, &env_b).unwrap();
        let ans_b = encode_answer_frame(CMD_TRANSFER, 0x00, &[0xB1]).unwrap();
        mock.expect(&req_a, &[&ans_a]);
        mock.expect(&req_b, &[&ans_b]);

        let (bridge, _) = bridge_with_mock(mock).await;
        let bridge = std::sync::Arc::new(bridge);

        let b_a = std::sync::Arc::clone(&bridge);
        let b_b = std::sync::Arc::clone(&bridge);
        let task_a = tokio::spawn(async move { b_a.transfer(target_a, &[0xA0]).await });
        let task_b = tokio::spawn(async move { b_b.transfer(target_b, &[0xB0]).await });

        assert_eq!(task_a.await.unwrap().unwrap(), vec![0xA1]);
        assert_eq!(task_b.await.unwrap().unwrap(), vec![0xB1]);
    }
}
