//! Transport trait for device communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the
//! spectrometer. The production implementation is a serial port
//! (`callisto-transport`); tests use the scripted `MockTransport` from
//! `callisto-test-harness`.
//!
//! The acquisition engine never talks to a serial port directly. It wraps a
//! `Box<dyn Transport>` in a byte-at-a-time reader so the same state machine
//! runs against real hardware and deterministic test scripts.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations must not return until every byte has been written
    /// and drained to the wire.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout` for
    /// data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
