//! Error types for the ESB bridge.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, link-protocol, and
//! gateway-level errors are all captured here.

/// The error type for all ESB bridge operations.
///
/// Variants cover the full range of failure modes encountered when talking
/// to the bridge device: serial transport failures, framing violations,
/// transaction timeouts, and errors reported by the remote firmware itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A payload exceeds (or falls short of) the protocol's size limits.
    #[error("invalid payload size")]
    InvalidSize,

    /// An invalid parameter was passed to a bridge operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A transport-level error (serial port open failure, incomplete write).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed answer from the device).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the answer to a transaction.
    ///
    /// This typically indicates the bridge device is unplugged, wedged, or
    /// the addressed radio peer never answered within the window.
    #[error("timeout waiting for answer")]
    Timeout,

    /// The answer's command identifier differs from the request's.
    ///
    /// Guards against a stale answer being attributed to a later request
    /// after a prior transaction timed out.
    #[error("answer command 0x{actual:02X} does not match request 0x{expected:02X}")]
    CommandMismatch {
        /// Command identifier of the request.
        expected: u8,
        /// Command identifier found in the answer frame.
        actual: u8,
    },

    /// No connection to the bridge device has been established.
    #[error("not connected")]
    NotConnected,

    /// The device answered, but reported an application-level error.
    ///
    /// Carries the nonzero status byte from the answer frame. Distinct from
    /// transport faults: the link worked, the firmware said no.
    #[error("device reported error status 0x{0:02X}")]
    Device(u8),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_size() {
        let e = Error::InvalidSize;
        assert_eq!(e.to_string(), "invalid payload size");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("listen capacity must be nonzero".into());
        assert_eq!(
            e.to_string(),
            "invalid parameter: listen capacity must be nonzero"
        );
    }

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_timeout() {
        let e = Error::Timeout;
        assert_eq!(e.to_string(), "timeout waiting for answer");
    }

    #[test]
    fn error_display_command_mismatch() {
        let e = Error::CommandMismatch {
            expected: 0x30,
            actual: 0x81,
        };
        assert_eq!(
            e.to_string(),
            "answer command 0x81 does not match request 0x30"
        );
    }

    #[test]
    fn error_display_not_connected() {
        let e = Error::NotConnected;
        assert_eq!(e.to_string(), "not connected");
    }

    #[test]
    fn error_display_device() {
        let e = Error::Device(0x42);
        assert_eq!(e.to_string(), "device reported error status 0x42");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
