//! esb-bridge-test-harness: mock transport for deterministic testing of the
//! link protocol and gateway without bridge hardware.
//!
//! [`MockTransport`] plays the device side of the link: scripted
//! request/answer exchanges for transaction traffic, plus a
//! [`FrameInjector`] for device-initiated frames (async radio receive
//! notifications), which a request/answer script alone cannot express.

pub mod mock_serial;

pub use mock_serial::{FrameInjector, MockTransport};
