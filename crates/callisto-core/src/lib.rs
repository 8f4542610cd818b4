//! callisto-core: Core traits, types, and error definitions for the
//! Callisto spectrometer daemon.
//!
//! This crate defines the pieces shared by every other crate in the
//! workspace, so sinks and command sources can be built without pulling in
//! the acquisition engine.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`DeviceState`] / [`Command`] / [`CommandFlags`] -- control-loop state
//! - [`FirmwareProfile`] -- version-dependent decoding constants
//! - [`ScheduleSource`] -- reloadable schedule backing store
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod flags;
pub mod schedule;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use flags::CommandFlags;
pub use schedule::{
    ScheduleAction, ScheduleEntry, ScheduleLoad, ScheduleSource, SourceSignature,
    initial_recording,
};
pub use transport::Transport;
pub use types::*;
