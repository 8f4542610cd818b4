//! Core types shared by the acquisition engine, the sinks and the
//! command sources.

use std::fmt;
use std::str::FromStr;

/// Lifecycle state of the receiver as tracked by the host.
///
/// ```text
/// Stopped --start--> Starting --"Started"--> Running
/// Running --stop--> Stopping --"Stopped"--> Stopped
/// Stopped --overview--> Overview --sweep timeout--> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    /// Idle; no bytes are read from the device.
    #[default]
    Stopped,
    /// Start sequence sent, waiting for the device to confirm.
    Starting,
    /// Continuous acquisition is in progress.
    Running,
    /// Frequency-sweep overview in progress.
    Overview,
    /// Stop sent, waiting for the device to confirm.
    Stopping,
}

impl DeviceState {
    /// `true` while acquisition is either running or about to run.
    pub fn is_recording(&self) -> bool {
        matches!(self, DeviceState::Starting | DeviceState::Running)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Stopped => "stopped",
            DeviceState::Starting => "starting",
            DeviceState::Running => "running",
            DeviceState::Overview => "overview",
            DeviceState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// An operator request understood by the control loop.
///
/// Every command source (signals, schedule, network server) maps onto
/// exactly these three requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Start recording, or begin a new output file when already running.
    Start,
    /// Stop recording.
    Stop,
    /// Run a frequency-sweep overview.
    Overview,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Overview => "overview",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command: {}", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "overview" => Ok(Command::Overview),
            _ => Err(ParseCommandError(s.to_string())),
        }
    }
}

/// Firmware-dependent constants, selected once at startup.
///
/// Versions 1.5, 1.7 and 1.8 differ in sample width (8 vs 10 bit), in the
/// intermediate frequency used for synthesizer math, and in whether a
/// channel query is followed by a raw EEPROM info line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirmwareProfile {
    /// First IF in MHz (second IF + crystal frequency).
    pub if_init: f64,
    /// Correction added to frequencies reported by the device, in MHz.
    pub if_correction: f64,
    /// Samples arrive as 10-bit values and are scaled down to 8 bits.
    pub data_10bit: bool,
    /// A channel query response is followed by an `EEPROM=...` line.
    pub eeprom_info: bool,
    /// Human-readable version label.
    pub version: &'static str,
}

impl FirmwareProfile {
    /// Firmware 1.5: 8-bit samples, reports frequencies with a 37.75 MHz IF.
    pub const V1_5: FirmwareProfile = FirmwareProfile {
        if_init: 37.7,
        if_correction: 0.05,
        data_10bit: false,
        eeprom_info: false,
        version: "1.5",
    };

    /// Firmware 1.7: 10-bit samples, 27 MHz crystal.
    pub const V1_7: FirmwareProfile = FirmwareProfile {
        if_init: 37.7,
        if_correction: 0.0,
        data_10bit: true,
        eeprom_info: false,
        version: "1.7",
    };

    /// Firmware 1.8: 10-bit samples, 25.43 MHz crystal, EEPROM info line.
    pub const V1_8: FirmwareProfile = FirmwareProfile {
        if_init: 36.13,
        if_correction: 0.0,
        data_10bit: true,
        eeprom_info: true,
        version: "1.8",
    };

    /// First-line prefixes of the `?` response, one per supported version.
    const SIGNATURES: [(&'static str, FirmwareProfile); 3] = [
        ("$CRX:ChargePump=", FirmwareProfile::V1_5),
        ("$CRX:Debug=", FirmwareProfile::V1_7),
        ("$CRX:V1.8 / ", FirmwareProfile::V1_8),
    ];

    /// Select the profile whose signature prefixes the `?` response.
    ///
    /// ```
    /// use callisto_core::FirmwareProfile;
    ///
    /// let fw = FirmwareProfile::detect(b"$CRX:V1.8 / 2013-07-01\r").unwrap();
    /// assert_eq!(fw.version, "1.8");
    /// assert!(FirmwareProfile::detect(b"$CRX:V2.0\r").is_none());
    /// ```
    pub fn detect(response: &[u8]) -> Option<FirmwareProfile> {
        Self::SIGNATURES
            .iter()
            .find(|(prefix, _)| response.starts_with(prefix.as_bytes()))
            .map(|(_, profile)| *profile)
    }

    /// Largest raw sample value the firmware may send.
    pub fn max_sample(&self) -> u16 {
        if self.data_10bit { 0x3ff } else { 0xff }
    }

    /// Scale a validated raw sample to the stored 8-bit value.
    pub fn scale(&self, raw: u16) -> u8 {
        if self.data_10bit {
            (raw >> 2) as u8
        } else {
            raw as u8
        }
    }
}

impl Default for FirmwareProfile {
    fn default() -> Self {
        FirmwareProfile::V1_5
    }
}

/// One configured measurement channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Channel {
    /// Frequency in MHz. Replaced by the device-reported frequency after
    /// channel verification.
    pub freq_mhz: f64,
    /// Number of integrations for light curves (informational).
    pub integrations: u32,
}

/// Receiver clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// Internal 11.0592 MHz oscillator.
    #[default]
    Internal,
    /// External 1 MHz reference.
    External,
}

impl ClockSource {
    /// Numeric code used in the `T` device command.
    pub fn code(&self) -> u8 {
        match self {
            ClockSource::Internal => 1,
            ClockSource::External => 2,
        }
    }

    /// Parse the numeric configuration code.
    pub fn from_code(code: i64) -> Option<ClockSource> {
        match code {
            1 => Some(ClockSource::Internal),
            2 => Some(ClockSource::External),
            _ => None,
        }
    }
}

/// Validated acquisition parameters handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverSettings {
    pub clock_source: ClockSource,
    /// Tuner gain PWM level (0..=255).
    pub agc_level: u32,
    pub charge_pump: bool,
    /// Focus code; selects the front-end configuration.
    pub focus_code: u32,
    /// Channels per sweep.
    pub nchannels: usize,
    /// Samples per second (sweeps per second × channels).
    pub samplerate: usize,
    /// Seconds of data per output file.
    pub filetime: usize,
    /// External local oscillator in MHz, 0 when absent.
    pub local_oscillator: f64,
}

impl ReceiverSettings {
    /// Capacity of one sample buffer: one output file worth of samples.
    pub fn buffer_capacity(&self) -> usize {
        self.filetime * self.samplerate
    }

    /// Duration of one sweep in microseconds.
    pub fn sweep_micros(&self) -> i64 {
        1_000_000 * self.nchannels as i64 / self.samplerate.max(1) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_state_recording() {
        assert!(DeviceState::Starting.is_recording());
        assert!(DeviceState::Running.is_recording());
        assert!(!DeviceState::Stopped.is_recording());
        assert!(!DeviceState::Stopping.is_recording());
        assert!(!DeviceState::Overview.is_recording());
    }

    #[test]
    fn command_from_str_case_insensitive() {
        assert_eq!("START".parse::<Command>(), Ok(Command::Start));
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("Overview".parse::<Command>(), Ok(Command::Overview));
        assert!("get".parse::<Command>().is_err());
    }

    #[test]
    fn firmware_detect_all_versions() {
        let v15 = FirmwareProfile::detect(b"$CRX:ChargePump=1\r$CRX:...").unwrap();
        assert_eq!(v15, FirmwareProfile::V1_5);
        let v17 = FirmwareProfile::detect(b"$CRX:Debug=0\r").unwrap();
        assert_eq!(v17, FirmwareProfile::V1_7);
        let v18 = FirmwareProfile::detect(b"$CRX:V1.8 / 12.04.2013\r").unwrap();
        assert_eq!(v18, FirmwareProfile::V1_8);
    }

    #[test]
    fn firmware_detect_requires_prefix() {
        assert!(FirmwareProfile::detect(b"").is_none());
        assert!(FirmwareProfile::detect(b"$CRX:Debug").is_none());
        assert!(FirmwareProfile::detect(b"junk$CRX:Debug=0\r").is_none());
    }

    #[test]
    fn firmware_scale() {
        assert_eq!(FirmwareProfile::V1_5.scale(0xAB), 0xAB);
        assert_eq!(FirmwareProfile::V1_8.scale(0x3FF), 0xFF);
        assert_eq!(FirmwareProfile::V1_7.scale(0x101), 0x40);
        assert_eq!(FirmwareProfile::V1_5.max_sample(), 0xFF);
        assert_eq!(FirmwareProfile::V1_8.max_sample(), 0x3FF);
    }

    #[test]
    fn clock_source_codes() {
        assert_eq!(ClockSource::from_code(1), Some(ClockSource::Internal));
        assert_eq!(ClockSource::from_code(2), Some(ClockSource::External));
        assert_eq!(ClockSource::from_code(0), None);
        assert_eq!(ClockSource::External.code(), 2);
    }

    #[test]
    fn settings_derived_values() {
        let s = ReceiverSettings {
            clock_source: ClockSource::Internal,
            agc_level: 120,
            charge_pump: true,
            focus_code: 59,
            nchannels: 200,
            samplerate: 800,
            filetime: 900,
            local_oscillator: 0.0,
        };
        assert_eq!(s.buffer_capacity(), 720_000);
        assert_eq!(s.sweep_micros(), 250_000);
    }
}
