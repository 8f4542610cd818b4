//! Acquisition engine for the e-Callisto radio spectrometer.
//!
//! This crate drives the receiver over its serial line and turns its output
//! into time-ordered sample buffers. It provides:
//!
//! - **Wire protocol** ([`protocol`]) -- byte classes and command strings.
//! - **Device link** ([`link`]) -- byte-at-a-time reads over a chunked
//!   [`Transport`](callisto_core::Transport), with the device read timeout.
//! - **Stream parsing** ([`demux`], [`hexdata`]) -- split the inbound stream
//!   into status messages and bulk data, and decode hex samples.
//! - **Buffers** ([`buffers`]) -- the double buffer and the single-slot
//!   hand-off to the sink task.
//! - **Control loop** ([`engine`]) -- the device state machine, command
//!   handling and fault recovery ([`fault`], [`recovery`]).
//! - **Schedule** ([`scheduler`]) -- daily start/stop/overview entries.
//! - **EEPROM** ([`eeprom`]) -- channel table upload and verification.
//! - **Sinks** ([`sink`]) -- buffer/overview sink traits and the drain task.
//! - **Builder** ([`builder`]) -- the startup handshake.
//!
//! # Byte stream
//!
//! ```text
//! $CRX:Started\r 2 0123 0045 ... 2323 2323 & $CRX:Stopped\r
//! '--message--'  '---------- bulk data --------' '--message--'
//! ```

pub mod buffers;
pub mod builder;
pub mod demux;
pub mod eeprom;
pub mod engine;
pub mod fault;
pub mod hexdata;
pub mod link;
pub mod overview;
pub mod protocol;
pub mod recovery;
pub mod scheduler;
pub mod sink;

pub use buffers::{CompletedBuffer, Consumer, Sweep, SweepReader};
pub use builder::SpectrometerBuilder;
pub use engine::Spectrometer;
pub use fault::Fault;
pub use overview::{OverviewPoint, OverviewReport};
pub use scheduler::Scheduler;
pub use sink::{BufferSink, OverviewSink, spawn_drain};
