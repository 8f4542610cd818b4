//! Mock transport for deterministic testing of the acquisition engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with two sources of
//! inbound bytes:
//!
//! - pre-loaded request/response pairs: when the engine sends a command
//!   matching the next expectation, the paired response is queued for reading;
//! - unsolicited bytes injected at any time with [`MockHandle::inject`],
//!   standing in for the sample stream or a spontaneous device reset banner.
//!
//! When nothing is queued, `receive()` reports a timeout immediately, which
//! is how the engine observes a silent device.
//!
//! The transport is moved into the engine as a `Box<dyn Transport>`; a
//! [`MockHandle`] obtained beforehand keeps access to the sent log and the
//! inbound queue.
//!
//! # Example
//!
//! ```
//! use callisto_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(b"S0\r", b"$CRX:Stopped\r");
//! let handle = mock.handle();
//! handle.inject(b"$CRX:Started\r");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use callisto_core::error::{Error, Result};
use callisto_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to queue when the matching request is received.
    response: Vec<u8>,
}

#[derive(Debug)]
struct Inner {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes waiting to be returned by `receive()`.
    inbound: VecDeque<u8>,
    /// Whether sends that do not match the next expectation are accepted.
    lenient: bool,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Upper bound on bytes returned per `receive()` call.
    chunk: usize,
}

/// A mock [`Transport`] for testing the engine without hardware.
///
/// Expectations are consumed in order. In strict mode (the default) a send
/// that does not match the next expectation fails with
/// [`Error::Protocol`]; in lenient mode it is only recorded.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

/// Shared view of a [`MockTransport`] that stays usable after the transport
/// itself has been boxed and handed to the engine.
#[derive(Debug, Clone)]
pub struct MockHandle {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Create a new strict mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(Inner {
                expectations: VecDeque::new(),
                inbound: VecDeque::new(),
                lenient: false,
                connected: true,
                sent_log: Vec::new(),
                chunk: 64,
            })),
        }
    }

    /// Accept sends that match no expectation instead of failing.
    pub fn lenient(self) -> Self {
        lock(&self.inner).lenient = true;
        self
    }

    /// Add an expected request/response pair.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        lock(&self.inner).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Limit how many bytes a single `receive()` returns.
    pub fn set_chunk_size(&mut self, chunk: usize) {
        lock(&self.inner).chunk = chunk.max(1);
    }

    /// Obtain a handle for inspecting and feeding this transport later.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Queue unsolicited inbound bytes.
    pub fn inject(&self, data: &[u8]) {
        lock(&self.inner).inbound.extend(data.iter().copied());
    }

    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        lock(&self.inner).expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// All data sent through the transport, one element per `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        lock(&self.inner).sent_log.clone()
    }

    /// Everything sent so far, concatenated and decoded as text.
    pub fn sent_text(&self) -> String {
        let inner = lock(&self.inner);
        inner
            .sent_log
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    /// Forget the sent log.
    pub fn clear_sent(&self) {
        lock(&self.inner).sent_log.clear();
    }

    /// Number of inbound bytes not yet read.
    pub fn pending_inbound(&self) -> usize {
        lock(&self.inner).inbound.len()
    }

    /// Number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        lock(&self.inner).expectations.len()
    }

    /// Set the connected state of the mock transport.
    pub fn set_connected(&self, connected: bool) {
        lock(&self.inner).connected = connected;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(Error::NotConnected);
        }

        inner.sent_log.push(data.to_vec());

        let matches_next = inner
            .expectations
            .front()
            .is_some_and(|e| e.request.as_slice() == data);

        if matches_next {
            if let Some(expectation) = inner.expectations.pop_front() {
                inner.inbound.extend(expectation.response);
            }
            Ok(())
        } else if inner.lenient {
            Ok(())
        } else {
            match inner.expectations.front() {
                Some(e) => Err(Error::Protocol(format!(
                    "unexpected send data: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&e.request),
                    String::from_utf8_lossy(data)
                ))),
                None => Err(Error::Protocol(
                    "no more expectations in mock transport".into(),
                )),
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(Error::NotConnected);
        }
        if inner.inbound.is_empty() {
            return Err(Error::Timeout);
        }

        let n = inner.inbound.len().min(buf.len()).min(inner.chunk);
        for (slot, byte) in buf.iter_mut().zip(inner.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.connected = false;
        inner.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"S0\r", b"$CRX:Stopped\r");

        mock.send(b"S0\r").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, Duration::from_millis(100)).await.unwrap();
        assert_eq!(&buf[..n], b"$CRX:Stopped\r");
    }

    #[tokio::test]
    async fn mock_transport_strict_rejects_unexpected() {
        let mut mock = MockTransport::new();
        mock.expect(b"S0\r", b"");

        let result = mock.send(b"GD\r").await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test]
    async fn mock_transport_lenient_records_unexpected() {
        let mut mock = MockTransport::new().lenient();
        let handle = mock.handle();

        mock.send(b"GD\r").await.unwrap();
        mock.send(b"S0\r").await.unwrap();

        assert_eq!(handle.sent_data(), vec![b"GD\r".to_vec(), b"S0\r".to_vec()]);
        assert_eq!(handle.sent_text(), "GD\rS0\r");
    }

    #[tokio::test]
    async fn mock_transport_empty_receive_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn mock_transport_injected_bytes_in_chunks() {
        let mut mock = MockTransport::new();
        mock.set_chunk_size(3);
        let handle = mock.handle();
        handle.inject(b"2ABCD");

        let mut buf = [0u8; 16];
        let n = mock.receive(&mut buf, Duration::ZERO).await.unwrap();
        assert_eq!(&buf[..n], b"2AB");
        let n = mock.receive(&mut buf, Duration::ZERO).await.unwrap();
        assert_eq!(&buf[..n], b"CD");
        assert_eq!(handle.pending_inbound(), 0);
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(b"S0\r").await;
        assert!(matches!(result.unwrap_err(), Error::NotConnected));
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        mock.expect(b"S0\r", b"");
        mock.expect(b"?\r", b"");
        let handle = mock.handle();
        assert_eq!(handle.remaining_expectations(), 2);

        mock.send(b"S0\r").await.unwrap();
        assert_eq!(handle.remaining_expectations(), 1);
    }
}
