//! Serial port transport for the ESB bridge device.
//!
//! The bridge enumerates as a USB virtual COM port (typically
//! `/dev/ttyACM0`). Its firmware speaks exactly one line configuration --
//! 115200 baud, 8 data bits, no parity, 1 stop bit -- so unlike a
//! general-purpose serial library there is nothing to configure here
//! beyond the device path.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use esb_bridge_core::error::{Error, Result};
use esb_bridge_core::transport::Transport;

/// Baud rate of the bridge firmware's CDC-ACM endpoint.
const BAUD_RATE: u32 = 115_200;

/// Serial port transport for the bridge device.
///
/// Implements the [`Transport`] trait over a USB virtual COM port with the
/// fixed 115200 8N1 line settings the firmware requires.
pub struct SerialTransport {
    /// The underlying serial port stream; `None` once closed.
    port: Option<SerialStream>,
    /// Port name for logging/debugging.
    port_name: String,
}

impl SerialTransport {
    /// Open the bridge device at `port` (e.g. `/dev/ttyACM0` on Linux,
    /// `COM3` on Windows).
    pub async fn open(port: &str) -> Result<Self> {
        tracing::debug!(port = %port, baud_rate = BAUD_RATE, "opening serial port");

        let serial_stream = tokio_serial::new(port, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "failed to open serial port");
                Error::Transport(format!("failed to open serial port {}: {}", port, e))
            })?;

        tracing::info!(port = %port, "serial port opened");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), "sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "failed to send data");
            if e.kind() == std::io::ErrorKind::BrokenPipe
                || e.kind() == std::io::ErrorKind::NotConnected
            {
                Error::Transport(format!("serial link lost: {}", e))
            } else {
                Error::Io(e)
            }
        })?;

        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "failed to flush serial port");
            Error::Io(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        let result = tokio::time::timeout(timeout, port.read(buf)).await;

        match result {
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, "received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "failed to receive data");
                if e.kind() == std::io::ErrorKind::BrokenPipe
                    || e.kind() == std::io::ErrorKind::NotConnected
                {
                    Err(Error::Transport(format!("serial link lost: {}", e)))
                } else {
                    Err(Error::Io(e))
                }
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "failed to flush before closing (continuing anyway)"
                );
            }

            // The port is dropped here, which closes it.
            tracing::info!(port = %self.port_name, "serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_nonexistent_device_fails() {
        let result = SerialTransport::open("/dev/null-does-not-exist").await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
