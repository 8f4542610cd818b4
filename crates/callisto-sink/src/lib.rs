//! callisto-sink: output writers for the Callisto daemon.
//!
//! - [`FitsWriter`] -- one FITS image per completed sample buffer, a
//!   [`BufferSink`](callisto_device::BufferSink) driven by the drain task
//! - [`PrnWriter`] -- overview reports as `.prn` text, an
//!   [`OverviewSink`](callisto_device::OverviewSink)
//!
//! FITS files are produced without any C library: [`header`] builds the
//! 80-character cards and the 2880-byte block padding.

pub mod fits;
pub mod header;
pub mod overview;

pub use fits::{FitsWriter, StationInfo};
pub use overview::PrnWriter;
