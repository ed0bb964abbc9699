//! Transport trait for bridge communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the bridge
//! device. The real implementation is a USB virtual COM port
//! (`esb-bridge-transport`); a mock implementation for deterministic unit
//! testing lives in `esb-bridge-test-harness`.
//!
//! The link protocol engine (`esb-bridge-usb`) operates on a `Transport`
//! rather than directly on a serial port, so the same framing, correlation,
//! and routing code runs against hardware and against scripted tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the bridge device.
///
/// Implementations handle raw byte movement only. Framing, checksum
/// validation, and answer correlation are handled by the link engine that
/// consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations must not return until every byte has been handed to
    /// the underlying link (serial TX buffer, scripted queue); a short write
    /// is an error, never a partial success.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout` for
    /// data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing is received within the deadline. This timeout is the raw
    /// read timeout and is independent of any transaction timeout layered
    /// on top.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
