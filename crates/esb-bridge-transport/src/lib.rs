//! Transport implementations for the ESB bridge.
//!
//! This crate provides the concrete [`Transport`](esb_bridge_core::Transport)
//! implementation for the physical link to the bridge device:
//!
//! - [`SerialTransport`]: the USB virtual COM port the bridge enumerates as
//!
//! # Example
//!
//! ```no_run
//! use esb_bridge_transport::SerialTransport;
//! use esb_bridge_core::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> esb_bridge_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyACM0").await?;
//!
//! // Send one 64-byte frame (framing is the link engine's job).
//! transport.send(&[0u8; 64]).await?;
//!
//! let mut buf = [0u8; 64];
//! let n = transport.receive(&mut buf, Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::SerialTransport;
