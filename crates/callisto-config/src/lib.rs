//! callisto-config: readers for the daemon's text files.
//!
//! - [`config`] -- `callisto.cfg`, the station configuration
//! - [`channels`] -- the channel (frequency) plan
//! - [`schedule`] -- the daily schedule, a reloadable
//!   [`ScheduleSource`](callisto_core::ScheduleSource)
//! - [`parser`] -- the `[key] = value` line format they share

pub mod channels;
pub mod config;
pub mod parser;
pub mod schedule;

pub use channels::ChannelPlan;
pub use config::{Config, Location, DEFAULT_CONFIG_FILE};
pub use schedule::ScheduleFile;
