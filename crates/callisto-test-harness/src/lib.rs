//! callisto-test-harness: Test utilities for the Callisto daemon.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! acquisition engine without a real receiver attached.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
