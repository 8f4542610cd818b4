//! The channel (frequency) file.
//!
//! ```text
//! [target]=CALLISTO
//! [number_of_measurements_per_sweep]=200
//! [number_of_sweeps_per_second]=4
//! [external_lo]=0.0
//! [0001]=45.000,1
//! [0002]=45.250,1
//! ```

use std::path::Path;

use tracing::{debug, warn};

use callisto_core::error::{Error, Result};
use callisto_core::types::Channel;

use crate::parser;

/// Channel slots available in the receiver EEPROM.
pub const MAX_CHANNELS: usize = 512;

/// Highest supported sample rate, in samples per second.
pub const MAX_SAMPLERATE: usize = 1000;

/// A validated channel plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPlan {
    /// Channels 1..=N in sweep order.
    pub channels: Vec<Channel>,
    pub sweeps_per_second: usize,
    /// Samples per second (`sweeps_per_second` × channels).
    pub samplerate: usize,
    /// External local oscillator in MHz, 0 when absent.
    pub local_oscillator: f64,
}

impl ChannelPlan {
    /// Read and validate a channel file.
    pub fn load(path: &Path) -> Result<ChannelPlan> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot open channel file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "reading channel file");
        ChannelPlan::parse(&text)
    }

    /// Parse and validate channel file text.
    pub fn parse(text: &str) -> Result<ChannelPlan> {
        let mut target_ok = false;
        let mut nchannels: Option<usize> = None;
        let mut sweeps_per_second = 0usize;
        let mut local_oscillator = 0.0;
        let mut slots: Vec<Option<Channel>> = vec![None; MAX_CHANNELS];

        for kv in parser::key_values(text)? {
            let value = kv.value.trim();
            match kv.key.as_str() {
                "target" => target_ok = value.eq_ignore_ascii_case("CALLISTO"),
                "number_of_measurements_per_sweep" => {
                    let n: i64 = value.parse().unwrap_or(0);
                    if n < 1 || n > MAX_CHANNELS as i64 {
                        return Err(Error::Config(format!("invalid number of channels: {value}")));
                    }
                    nchannels = Some(n as usize);
                }
                "number_of_sweeps_per_second" => {
                    sweeps_per_second = value.parse().unwrap_or(0);
                }
                "external_lo" => {
                    local_oscillator = value.parse().map_err(|_| {
                        Error::Config(format!("invalid external_lo value: {value}"))
                    })?;
                }
                key => {
                    let Ok(number) = key.parse::<i64>() else {
                        debug!(key, "ignoring channel file key");
                        continue;
                    };
                    if number < 1 || number > MAX_CHANNELS as i64 {
                        warn!(channel = number, "channel out of range");
                        continue;
                    }
                    match parse_channel(value) {
                        Some(channel) => slots[number as usize - 1] = Some(channel),
                        None => warn!(line = kv.line, value, "bad channel definition"),
                    }
                }
            }
        }

        if !target_ok {
            return Err(Error::Config("channel file is not for Callisto".into()));
        }
        let nchannels = nchannels
            .ok_or_else(|| Error::Config("number of channels missing from channel file".into()))?;

        let samplerate = sweeps_per_second * nchannels;
        if samplerate < 1 || samplerate > MAX_SAMPLERATE {
            return Err(Error::Config(format!("sample rate out of range ({samplerate})")));
        }

        let channels = slots
            .into_iter()
            .take(nchannels)
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| Error::Config(format!("channel {} definition missing", i + 1)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ChannelPlan {
            channels,
            sweeps_per_second,
            samplerate,
            local_oscillator,
        })
    }
}

/// Parse `freq_mhz , integrations`.
fn parse_channel(value: &str) -> Option<Channel> {
    let (freq, integrations) = value.split_once(',')?;
    Some(Channel {
        freq_mhz: freq.trim().parse().ok()?,
        integrations: integrations.trim().parse().ok()?,
    })
}
