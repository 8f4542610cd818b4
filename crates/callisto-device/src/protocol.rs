//! Wire-level constants and command encoding for the receiver.
//!
//! Outbound traffic is plain ASCII commands, each terminated by a carriage
//! return; several commands are often concatenated into one write. Inbound
//! traffic is a mix of `$`-delimited status messages, a `2`...`&` bulk region
//! of hex-encoded samples, and the single-byte EEPROM-ready marker.

use callisto_core::types::{ClockSource, ReceiverSettings};

/// Starts a status message.
pub const MESSAGE_START: u8 = b'$';
/// Ends a status message.
pub const MESSAGE_END: u8 = b'\r';
/// Starts the bulk-data region.
pub const DATA_START: u8 = b'2';
/// Ends the bulk-data region.
pub const DATA_END: u8 = b'&';
/// Sent after every EEPROM write completes.
pub const EEPROM_READY: u8 = b']';

/// Longest status message kept; the rest of a longer line is dropped.
pub const MAX_MESSAGE: usize = 127;

/// Two of these words terminate every bulk-data region.
pub const HEX_END_MARKER: u16 = 0x2323;

/// Debug off, disable output, stop.
pub const RESET: &str = "D0\rGD\rS0\r";
/// Identification query; a stopped receiver answers `$CRX:Stopped`.
pub const ID_QUERY: &str = "S0\r";
/// Expected start of the identification response.
pub const ID_RESPONSE: &[u8] = b"$CRX:Stopped\r";
/// Status query; the first response line identifies the firmware.
pub const VERSION_QUERY: &str = "?\r";
/// Disable output; the receiver answers `$CRX:Stopped` once idle.
pub const STOP: &str = "GD\r";
/// Stop the sampling state machine after the bulk region ends.
pub const STOP_SAMPLING: &str = "S0\r";
/// Disable output and stop, sent on termination.
pub const HALT: &str = "GD\rS0\r";
/// Turn device debug output on (needed for channel queries).
pub const DEBUG_ON: &str = "D1\r";
/// Turn device debug output off.
pub const DEBUG_OFF: &str = "D0\r";
/// Tuner-1 sweep from 45 MHz over 13200 points, reported as text.
pub const OVERVIEW: &str = "T0\rM2\r%5\rF0045.0\rL13200\rP2\r";

/// Status message confirming the sampling loop started.
pub const MSG_STARTED: &str = "CRX:Started";
/// Status message confirming the sampling loop stopped.
pub const MSG_STOPPED: &str = "CRX:Stopped";
/// Banner printed by the receiver after it resets itself.
pub const RESET_BANNER: &str = "CRX:e-Callisto ETH Zurich";

/// Clock, gain and charge-pump configuration.
///
/// The internal clock runs at 11.0592 MHz with a 64x prescaler and two
/// cycles per sample (86400 ticks/s); the external reference is 1 MHz with
/// two cycles per sample (500000 ticks/s). The counter runs from 0 to N-1.
pub fn init_command(settings: &ReceiverSettings) -> String {
    let rate = settings.samplerate.max(1);
    let clock = match settings.clock_source {
        ClockSource::Internal => format!("GS{}\r", (86_400 / rate).saturating_sub(1)),
        ClockSource::External => format!("GA{}\r", (500_000 / rate).saturating_sub(1)),
    };
    format!(
        "{clock}T{}\rO{:03}\rC{}\r",
        settings.clock_source.code(),
        settings.agc_level,
        u8::from(settings.charge_pump)
    )
}

/// Focus code, channel count, start sampling, enable output.
pub fn start_command(settings: &ReceiverSettings) -> String {
    format!(
        "FS{:02}{:02}\rL{}\rS1\rGE\r",
        settings.focus_code,
        settings.focus_code.saturating_sub(1),
        settings.nchannels
    )
}

/// Query the synthesizer setting stored for a 1-based channel.
pub fn channel_query(channel: usize) -> String {
    format!("FR{channel}\r")
}

/// Store a synthesizer setting for a 1-based channel in the EEPROM.
pub fn channel_store(channel: usize, divider: u32, control: u8, band: u8) -> String {
    format!(
        "FE{},{:03},{:03},{:03},{:03}\r",
        channel,
        (divider >> 8) & 0xff,
        divider & 0xff,
        control,
        band
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(clock_source: ClockSource) -> ReceiverSettings {
        ReceiverSettings {
            clock_source,
            agc_level: 120,
            charge_pump: true,
            focus_code: 59,
            nchannels: 200,
            samplerate: 800,
            filetime: 900,
            local_oscillator: 0.0,
        }
    }

    #[test]
    fn init_internal_clock() {
        assert_eq!(
            init_command(&settings(ClockSource::Internal)),
            "GS107\rT1\rO120\rC1\r"
        );
    }

    #[test]
    fn init_external_clock() {
        let mut s = settings(ClockSource::External);
        s.agc_level = 5;
        s.charge_pump = false;
        assert_eq!(init_command(&s), "GA624\rT2\rO005\rC0\r");
    }

    #[test]
    fn start_sequence() {
        assert_eq!(start_command(&settings(ClockSource::Internal)), "FS5958\rL200\rS1\rGE\r");
    }

    #[test]
    fn channel_commands() {
        assert_eq!(channel_query(12), "FR12\r");
        assert_eq!(channel_store(1, 0x0503, 0xC6, 1), "FE1,005,003,198,001\r");
    }
}
