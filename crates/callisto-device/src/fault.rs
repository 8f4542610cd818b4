//! Recoverable device faults.
//!
//! A [`Fault`] never leaves the engine: each one is logged with the raw byte
//! or value that caused it and answered with the same reset, reinit and
//! (if acquisition was active) resume sequence.

/// A recoverable misbehaviour of the device or the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// A byte outside any message or bulk-data region.
    #[error("unexpected character {:?} (0x{0:02X})", char::from(*.0))]
    UnexpectedByte(u8),

    /// A non-hex character inside the bulk-data region.
    #[error("invalid hex character {:?} (0x{0:02X})", char::from(*.0))]
    InvalidHexDigit(u8),

    /// More than two end markers in one bulk-data region.
    #[error("too many hex data end markers")]
    TooManyEndMarkers,

    /// A sample wider than the firmware's sample width.
    #[error("invalid hex value 0x{0:04X}")]
    SampleOutOfRange(u16),

    /// No byte arrived within the device timeout outside overview mode.
    #[error("timeout reading from serial port")]
    CommunicationTimeout,

    /// The device printed its power-on banner.
    #[error("hardware reset detected")]
    DeviceAutoReset,
}

impl Fault {
    /// Whether recovery should send the device-level reset command.
    ///
    /// A device that has just reset itself is already in its power-on
    /// state.
    pub fn needs_device_reset(&self) -> bool {
        !matches!(self, Fault::DeviceAutoReset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_includes_raw_values() {
        assert_eq!(
            Fault::UnexpectedByte(b'X').to_string(),
            "unexpected character 'X' (0x58)"
        );
        assert_eq!(
            Fault::SampleOutOfRange(0x400).to_string(),
            "invalid hex value 0x0400"
        );
        assert_eq!(
            Fault::InvalidHexDigit(b'g').to_string(),
            "invalid hex character 'g' (0x67)"
        );
    }

    #[test]
    fn only_auto_reset_skips_device_reset() {
        assert!(!Fault::DeviceAutoReset.needs_device_reset());
        assert!(Fault::CommunicationTimeout.needs_device_reset());
        assert!(Fault::TooManyEndMarkers.needs_device_reset());
    }
}
