//! esb-bridge-core: Core traits, types, and error definitions for the ESB
//! bridge.
//!
//! This crate defines the link-agnostic abstractions the rest of the
//! workspace builds on. Applications depend on these types without pulling
//! in the serial transport or the USB link engine.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the device
//! - [`EsbMessage`] / [`EsbAddress`] / [`ListenFilter`] -- radio-level
//!   messages and subscription filters
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod message;
pub mod transport;

// Re-export key types at crate root for ergonomic `use esb_bridge_core::*`.
pub use error::{Error, Result};
pub use message::{ADDRESS_SIZE, CMD_WILDCARD, EsbAddress, EsbMessage, ListenFilter};
pub use transport::Transport;
