//! Channel table upload to, and verification against, the receiver EEPROM.
//!
//! Each channel is stored as a synthesizer divider plus control and band
//! bytes. Verification reads every channel back through the debug interface
//! and replaces the configured frequency with the one the device actually
//! tunes to.

use tracing::{debug, info};

use callisto_core::error::{Error, Result};
use callisto_core::types::{Channel, FirmwareProfile};

use crate::link::DeviceLink;
use crate::protocol::{self, EEPROM_READY, MAX_MESSAGE};

/// Synthesizer step in MHz.
pub const SYNTHESIZER_RESOLUTION: f64 = 0.0625;

/// Upper edge of the low band, MHz.
const LOW_BAND: f64 = 171.0;
/// Upper edge of the mid band, MHz.
const MID_BAND: f64 = 450.0;

/// Base synthesizer control byte; bit 6 enables the charge pump.
const CONTROL_BASE: u8 = 0x86;
const CONTROL_CHARGE_PUMP: u8 = 0x40;

/// Encoded EEPROM entry for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesizerWord {
    pub divider: u32,
    pub control: u8,
    pub band: u8,
}

impl SynthesizerWord {
    /// Compute the entry tuning `freq_mhz` through an optional external
    /// local oscillator.
    pub fn for_frequency(
        freq_mhz: f64,
        local_oscillator: f64,
        profile: &FirmwareProfile,
        charge_pump: bool,
    ) -> SynthesizerWord {
        let f = (freq_mhz - local_oscillator).abs();
        let divider = ((f + profile.if_init) / SYNTHESIZER_RESOLUTION) as u32;
        let control = if charge_pump {
            CONTROL_BASE | CONTROL_CHARGE_PUMP
        } else {
            CONTROL_BASE
        };
        let band = if f < LOW_BAND {
            1
        } else if f < MID_BAND {
            2
        } else {
            4
        };
        SynthesizerWord {
            divider,
            control,
            band,
        }
    }
}

/// Write every channel to the EEPROM, waiting for the ready marker after
/// each one.
pub async fn upload_channels(
    link: &mut DeviceLink,
    profile: &FirmwareProfile,
    channels: &[Channel],
    local_oscillator: f64,
    charge_pump: bool,
) -> Result<()> {
    info!(channels = channels.len(), "uploading channels to EEPROM");
    for (index, channel) in channels.iter().enumerate() {
        let word =
            SynthesizerWord::for_frequency(channel.freq_mhz, local_oscillator, profile, charge_pump);
        link.send(&protocol::channel_store(
            index + 1,
            word.divider,
            word.control,
            word.band,
        ))
        .await?;
        if !link.wait_for(EEPROM_READY).await? {
            return Err(Error::Startup(format!(
                "timeout while uploading channel {}",
                index + 1
            )));
        }
    }
    Ok(())
}

/// A parsed `$CRX:Frequency...` channel query response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyReport {
    /// `=` when the firmware appends an EEPROM info line, `~` otherwise.
    pub separator: char,
    /// Frequency as printed by the device, before IF correction.
    pub mhz: f64,
}

/// Parse `$CRX:Frequency<sep><MHz>.<kHz>MHz`.
///
/// The firmware prints the kHz part without leading zeros, so `45.62`
/// means 45.062 MHz.
pub fn parse_frequency(line: &str) -> Option<FrequencyReport> {
    let rest = line.strip_prefix("$CRX:Frequency")?;
    let mut chars = rest.chars();
    let separator = chars.next()?;
    let (whole, fraction) = chars.as_str().split_once('.')?;
    let whole = whole.trim().parse::<i64>().ok()?;
    let fraction = fraction.trim_start();
    let digits = fraction
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(fraction.len());
    let fraction = fraction[..digits].parse::<i64>().ok()?;
    Some(FrequencyReport {
        separator,
        mhz: (whole * 1000 + fraction) as f64 / 1000.0,
    })
}

/// Map a device-reported intermediate value back to the sky frequency,
/// choosing the sideband of the local oscillator closest to `configured`.
pub fn compensate_local_oscillator(reported: f64, local_oscillator: f64, configured: f64) -> f64 {
    let upper = reported + local_oscillator;
    let mut lower = local_oscillator - reported;
    if lower < 0.0 {
        lower = upper;
    }
    if (configured - upper).abs() <= (configured - lower).abs() {
        upper
    } else {
        lower
    }
}

async fn skip_line(link: &mut DeviceLink) -> Result<()> {
    match link.read_line(MAX_MESSAGE).await? {
        Some(_) => Ok(()),
        None => Err(Error::Startup("timeout reading expected message".into())),
    }
}

/// Read every channel back and replace its frequency with the device's.
///
/// Fails when a channel differs from its configured value by more than one
/// synthesizer step, which usually means the table was never uploaded.
pub async fn verify_channels(
    link: &mut DeviceLink,
    profile: &FirmwareProfile,
    channels: &mut [Channel],
    local_oscillator: f64,
) -> Result<()> {
    debug!(channels = channels.len(), "downloading channels");
    link.send(protocol::DEBUG_ON).await?;
    // Response line, then the command echo.
    skip_line(link).await?;
    skip_line(link).await?;

    for (index, channel) in channels.iter_mut().enumerate() {
        let number = index + 1;
        link.send(&protocol::channel_query(number)).await?;

        let line = link
            .read_line(MAX_MESSAGE)
            .await?
            .map(|l| String::from_utf8_lossy(&l).into_owned())
            .ok_or_else(|| {
                Error::Startup(format!("incomplete line while downloading channel {number}"))
            })?;
        let report = parse_frequency(&line)
            .filter(|r| matches!(r.separator, '~' | '='))
            .ok_or_else(|| {
                Error::Startup(format!(
                    "invalid response to FR command: {}",
                    line.trim_end().escape_debug()
                ))
            })?;
        if (report.separator == '=') != profile.eeprom_info {
            return Err(Error::Startup(format!(
                "firmware mismatch detected on channel {number}"
            )));
        }
        if profile.eeprom_info {
            skip_line(link).await?;
        }

        let reported = report.mhz + profile.if_correction;
        let actual = compensate_local_oscillator(reported, local_oscillator, channel.freq_mhz);
        if (actual - channel.freq_mhz).abs() > 1.01 * SYNTHESIZER_RESOLUTION {
            link.send(protocol::DEBUG_OFF).await?;
            return Err(Error::Startup(format!(
                "frequency of channel {number} ({actual:.3} MHz) differs from its configured \
                 value ({:.3} MHz); the channels may need to be loaded into the EEPROM",
                channel.freq_mhz
            )));
        }
        channel.freq_mhz = actual;

        // Command echo.
        skip_line(link).await?;
    }

    link.send(protocol::DEBUG_OFF).await?;
    Ok(())
}
