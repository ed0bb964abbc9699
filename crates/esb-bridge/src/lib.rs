//! # esb-bridge -- ESB Radio Bridge Gateway
//!
//! `esb-bridge` multiplexes one ESB (Enhanced ShockBurst) radio bridge
//! device, attached over a USB virtual COM port, across many independent
//! in-process clients. Clients issue request/answer transfers to 5-byte
//! radio pipeline addresses and subscribe to asynchronous inbound radio
//! traffic; the library serializes everything onto the single serial link.
//!
//! ## Quick Start
//!
//! ```no_run
//! use esb_bridge::{EsbAddress, EsbBridgeBuilder, ListenFilter, CMD_WILDCARD};
//!
//! #[tokio::main]
//! async fn main() -> esb_bridge::Result<()> {
//!     let bridge = EsbBridgeBuilder::new()
//!         .device("/dev/ttyACM0")
//!         .build()
//!         .await?;
//!
//!     println!("firmware: {}", bridge.firmware_version().await?);
//!
//!     // Request/answer exchange with a radio peer.
//!     let target = EsbAddress::new([111, 111, 111, 111, 1]);
//!     let answer = bridge.transfer(target, &[0x10]).await?;
//!     println!("answer: {answer:02X?}");
//!
//!     // Stream every message this peer sends us.
//!     let mut stream = bridge
//!         .listen(ListenFilter::new(target, CMD_WILDCARD))
//!         .await?;
//!     while let Some(msg) = stream.recv().await {
//!         println!("{}: {:02X?}", msg.source, msg.payload);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                     | Purpose                                      |
//! |---------------------------|----------------------------------------------|
//! | `esb-bridge-core`         | `Transport` trait, message types, errors     |
//! | `esb-bridge-transport`    | Serial transport (115200 8N1)                |
//! | `esb-bridge-usb`          | 64-byte frame codec + link IO task           |
//! | **`esb-bridge`**          | This crate: gateway, router, builder         |
//! | `esb-bridge-test-harness` | `MockTransport` for hardware-free testing    |
//!
//! Inside the process, one IO task owns the transport: it serializes
//! concurrent transfers into the protocol's single in-flight transaction
//! (the wire format has no correlation token, so exclusivity is the
//! correlation), and routes device-initiated frames to the envelope
//! router, which fans them out to filtered subscriber streams.
//!
//! ## Subscriptions
//!
//! [`EsbBridge::listen`] filters by source address and command byte, each
//! with a wildcard form. Streams are bounded: a subscriber that stops
//! draining loses messages rather than stalling the bridge, and dropping
//! the stream cancels the subscription.

pub use esb_bridge_core::*;

pub mod bridge;
pub mod builder;
mod router;

pub use bridge::{CMD_SEND, CMD_TRANSFER, CMD_VERSION, DEFAULT_LISTEN_CAPACITY, EsbBridge, MAX_ESB_PAYLOAD};
pub use builder::EsbBridgeBuilder;
