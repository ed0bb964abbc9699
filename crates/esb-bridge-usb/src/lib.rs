//! esb-bridge-usb: the framed link protocol between host and bridge device.
//!
//! The bridge device speaks a fixed-size packet protocol over its USB
//! virtual COM port: every packet is exactly 64 bytes, opened by a sync
//! byte and sealed by a CRC-16 trailer. This crate contains the two halves
//! of that protocol:
//!
//! - [`frame`]: the pure byte-level codec (encode, decode, checksum)
//! - [`io`]: the link IO task that owns the transport, correlates answers
//!   to requests, and routes device-initiated frames to listeners

pub mod frame;
pub mod io;

pub use frame::{CMD_IRQ, CMD_RX, CMD_TEST, FRAME_SIZE, Frame, MAX_PAYLOAD_LEN, SYNC};
pub use io::{Answer, LinkConfig, LinkIo, spawn_link_io};
