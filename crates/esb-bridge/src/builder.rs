//! EsbBridgeBuilder -- fluent builder for constructing [`EsbBridge`]
//! connections.
//!
//! Separates configuration from connection establishment so callers can set
//! timeouts before the serial port is opened, and so tests can inject a
//! mock transport in place of hardware.
//!
//! # Example
//!
//! ```no_run
//! use esb_bridge::EsbBridgeBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> esb_bridge_core::Result<()> {
//! let bridge = EsbBridgeBuilder::new()
//!     .device("/dev/ttyACM0")
//!     .transfer_timeout(Duration::from_millis(300))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::mpsc;

use esb_bridge_core::error::{Error, Result};
use esb_bridge_core::transport::Transport;
use esb_bridge_transport::SerialTransport;
use esb_bridge_usb::{CMD_RX, LinkConfig, spawn_link_io};
use esb_bridge_usb::io::{DEFAULT_READ_TIMEOUT, DEFAULT_TRANSFER_TIMEOUT};

use crate::bridge::EsbBridge;
use crate::router::spawn_router;

/// Capacity of the queue between the link IO task and the envelope router.
/// Bursts beyond this are dropped at the link layer rather than stalling
/// the read loop.
const RX_QUEUE_CAPACITY: usize = 16;

/// Fluent builder for [`EsbBridge`].
pub struct EsbBridgeBuilder {
    device: Option<String>,
    transfer_timeout: Duration,
    read_timeout: Duration,
}

impl EsbBridgeBuilder {
    /// Create a builder with default timeouts.
    pub fn new() -> Self {
        EsbBridgeBuilder {
            device: None,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set the serial device path (e.g. `/dev/ttyACM0` or `COM3`).
    pub fn device(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    /// Set the timeout for waiting for the answer to a transaction
    /// (default: 500 ms).
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the raw serial read timeout (default: 100 ms). Independent of
    /// the transaction timeout; only paces the idle read loop.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Build an [`EsbBridge`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a `MockTransport`
    /// from `esb-bridge-test-harness`) and for advanced cases where the
    /// caller manages the transport itself.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<EsbBridge> {
        let link = spawn_link_io(
            transport,
            LinkConfig {
                transfer_timeout: self.transfer_timeout,
                read_timeout: self.read_timeout,
            },
        );

        // All async radio receive notifications flow to the router.
        let (frame_tx, frame_rx) = mpsc::channel(RX_QUEUE_CAPACITY);
        link.listen(CMD_RX, frame_tx).await?;
        let router = spawn_router(frame_rx);

        Ok(EsbBridge::new(link, router, self.transfer_timeout))
    }

    /// Build an [`EsbBridge`] by opening the configured serial device.
    ///
    /// Requires that [`device()`](Self::device) has been called.
    pub async fn build(self) -> Result<EsbBridge> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("device is required for build()".into()))?;

        let transport = SerialTransport::open(device).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for EsbBridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esb_bridge_test_harness::MockTransport;

    #[tokio::test]
    async fn builder_device_required_for_build() {
        let result = EsbBridgeBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builder_fluent_chain_with_mock() {
        let bridge = EsbBridgeBuilder::new()
            .device("/dev/ttyACM0") // ignored when a transport is injected
            .transfer_timeout(Duration::from_millis(200))
            .read_timeout(Duration::from_millis(50))
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();

        bridge.close();
    }
}
