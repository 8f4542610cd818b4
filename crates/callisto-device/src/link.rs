//! Byte-oriented view of the device transport.
//!
//! The acquisition engine consumes the inbound stream one byte at a time and
//! writes whole command strings. [`DeviceLink`] adapts a chunked
//! [`Transport`] to that model: it reads whatever the transport delivers into
//! a local queue and hands bytes out individually, turning a transport
//! timeout into `Ok(None)`.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::trace;

use callisto_core::error::{Error, Result};
use callisto_core::transport::Transport;

/// Device-level read timeout (the receiver's serial VTIME of one second).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Bytes discarded at most while flushing stale output after a reset.
pub const FLUSH_LIMIT: usize = 10_000;

const READ_CHUNK: usize = 256;

/// Command/byte interface to the receiver.
pub struct DeviceLink {
    transport: Box<dyn Transport>,
    pending: BytesMut,
    read_timeout: Duration,
}

impl DeviceLink {
    /// Wrap a transport using the default one-second read timeout.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_timeout(transport, DEFAULT_READ_TIMEOUT)
    }

    /// Wrap a transport with an explicit read timeout.
    pub fn with_timeout(transport: Box<dyn Transport>, read_timeout: Duration) -> Self {
        DeviceLink {
            transport,
            pending: BytesMut::with_capacity(READ_CHUNK),
            read_timeout,
        }
    }

    /// The configured read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Bytes received from the transport but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Write a complete command string.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        trace!(command = %command.escape_debug(), "device command");
        self.transport.send(command.as_bytes()).await
    }

    /// Read the next byte, or `None` if the device stayed silent for the
    /// whole read timeout.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.pending.is_empty() {
            let mut chunk = [0u8; READ_CHUNK];
            match self.transport.receive(&mut chunk, self.read_timeout).await {
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(Error::Timeout) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        if self.pending.has_remaining() {
            Ok(Some(self.pending.get_u8()))
        } else {
            Ok(None)
        }
    }

    /// Read bytes until the device goes quiet, keeping at most `limit`.
    ///
    /// Bytes beyond `limit` are still consumed so the next read starts on a
    /// quiet line.
    pub async fn read_until_quiet(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(byte) = self.read_byte().await? {
            if out.len() < limit {
                out.push(byte);
            }
        }
        Ok(out)
    }

    /// Read one `\r`-terminated line (terminator included), keeping at most
    /// `limit` bytes. Returns `None` if the device went quiet first.
    pub async fn read_line(&mut self, limit: usize) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            match self.read_byte().await? {
                None => return Ok(None),
                Some(byte) => {
                    if line.len() < limit {
                        line.push(byte);
                    }
                    if byte == b'\r' {
                        return Ok(Some(line));
                    }
                }
            }
        }
    }

    /// Wait for a specific byte, discarding everything before it.
    /// Returns `false` if the device went quiet first.
    pub async fn wait_for(&mut self, wanted: u8) -> Result<bool> {
        while let Some(byte) = self.read_byte().await? {
            if byte == wanted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Discard stale input until the device goes quiet or `limit` bytes have
    /// been thrown away. Returns `true` if the line went quiet.
    pub async fn discard_input(&mut self, limit: usize) -> Result<bool> {
        let buffered = self.pending.len().min(limit);
        self.pending.advance(buffered);
        let mut remaining = limit - buffered;
        while remaining > 0 {
            if self.read_byte().await?.is_none() {
                return Ok(true);
            }
            remaining -= 1;
        }
        Ok(false)
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callisto_test_harness::MockTransport;

    fn link_with(data: &[u8]) -> DeviceLink {
        let mock = MockTransport::new();
        mock.handle().inject(data);
        DeviceLink::new(Box::new(mock))
    }

    #[tokio::test]
    async fn read_byte_then_timeout() {
        let mut link = link_with(b"$C");
        assert_eq!(link.read_byte().await.unwrap(), Some(b'$'));
        assert_eq!(link.read_byte().await.unwrap(), Some(b'C'));
        assert_eq!(link.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_until_quiet_respects_limit() {
        let mut link = link_with(b"0123456789");
        assert_eq!(link.read_until_quiet(4).await.unwrap(), b"0123");
        assert_eq!(link.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_stops_at_carriage_return() {
        let mut link = link_with(b"$CRX:Debug=0\rnext");
        assert_eq!(link.read_line(128).await.unwrap().unwrap(), b"$CRX:Debug=0\r");
        assert_eq!(link.read_line(128).await.unwrap(), None);
    }

    #[tokio::test]
    async fn discard_input_reports_quiet_line() {
        let mut link = link_with(b"stale");
        assert!(link.discard_input(FLUSH_LIMIT).await.unwrap());
    }

    #[tokio::test]
    async fn discard_input_reports_babbling_device() {
        let mut link = link_with(&[b'x'; 64]);
        assert!(!link.discard_input(16).await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_marker() {
        let mut link = link_with(b"$CRX:ok\r]");
        assert!(link.wait_for(b']').await.unwrap());
        assert!(!link.wait_for(b']').await.unwrap());
    }

    #[tokio::test]
    async fn send_records_command() {
        let mock = MockTransport::new().lenient();
        let handle = mock.handle();
        let mut link = DeviceLink::new(Box::new(mock));
        link.send("GD\r").await.unwrap();
        assert_eq!(handle.sent_text(), "GD\r");
    }
}
