//! Error types for the Callisto daemon.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport, configuration, startup and
//! unrecoverable device failures are all captured here. Recoverable device
//! faults (protocol violations, timeouts, device self-resets) never surface
//! as an [`Error`]; the acquisition engine handles them inline.

/// The error type for all Callisto operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/configure failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error outside the acquisition loop (malformed
    /// identification or channel-query response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for data from the device.
    #[error("timeout waiting for response")]
    Timeout,

    /// No connection to the device has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A configuration, channel or schedule file is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The device could not be brought into a known state at startup.
    #[error("startup failed: {0}")]
    Startup(String),

    /// The identification response did not match any supported firmware.
    #[error("unsupported firmware: {0}")]
    UnsupportedFirmware(String),

    /// Three or more resets happened within a few seconds of each other.
    ///
    /// The device keeps failing in a way software resets cannot fix, so the
    /// daemon terminates instead of spinning.
    #[error("reset loop detected")]
    ResetLoop,

    /// An output artifact (image or overview report) could not be produced.
    #[error("sink error: {0}")]
    Sink(String),

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
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_config() {
        let e = Error::Config("missing key rxcomport".into());
        assert_eq!(e.to_string(), "configuration error: missing key rxcomport");
    }

    #[test]
    fn error_display_unsupported_firmware() {
        let e = Error::UnsupportedFirmware("$CRX:V2.0".into());
        assert_eq!(e.to_string(), "unsupported firmware: $CRX:V2.0");
    }

    #[test]
    fn error_display_reset_loop() {
        assert_eq!(Error::ResetLoop.to_string(), "reset loop detected");
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
}
