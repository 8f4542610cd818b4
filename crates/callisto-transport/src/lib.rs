//! Transport implementations for the Callisto daemon.
//!
//! This crate provides [`SerialTransport`], the concrete implementation of
//! the [`Transport`](callisto_core::Transport) trait from `callisto-core`
//! used against real hardware.

pub mod serial;

pub use serial::{DEFAULT_BAUD_RATE, SerialConfig, SerialTransport};
