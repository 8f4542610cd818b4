//! Hex-sample decoder for the bulk-data region.
//!
//! Samples arrive as four uppercase hex digits, most significant nibble
//! first. The word `0x2323` marks the end of the stream and is sent twice;
//! a third marker means the stream is out of sync.

use tracing::debug;

use callisto_core::types::FirmwareProfile;

use crate::fault::Fault;
use crate::protocol::HEX_END_MARKER;

/// Result of feeding one digit to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexWord {
    /// Fewer than four digits accumulated.
    Pending,
    /// An end-of-stream marker; carries how many have been seen.
    EndMarker(u32),
    /// A validated sample, already scaled to 8 bits.
    Sample(u8),
}

/// Four-digit accumulator with end-marker tracking.
#[derive(Debug)]
pub struct HexDecoder {
    profile: FirmwareProfile,
    value: u16,
    digits: u8,
    end_markers: u32,
}

impl HexDecoder {
    /// Create a decoder for the detected firmware.
    pub fn new(profile: FirmwareProfile) -> Self {
        HexDecoder {
            profile,
            value: 0,
            digits: 0,
            end_markers: 0,
        }
    }

    /// Clear the accumulator and the end-marker count. Buffer contents are
    /// not the decoder's concern and stay untouched.
    pub fn reset(&mut self) {
        self.value = 0;
        self.digits = 0;
        self.end_markers = 0;
    }

    /// Feed one digit.
    pub fn push(&mut self, digit: u8) -> Result<HexWord, Fault> {
        let nibble = match digit {
            b'0'..=b'9' => digit - b'0',
            b'A'..=b'F' => digit - b'A' + 10,
            _ => return Err(Fault::InvalidHexDigit(digit)),
        };
        self.value = (self.value << 4) | u16::from(nibble);
        self.digits += 1;
        if self.digits < 4 {
            return Ok(HexWord::Pending);
        }

        let value = self.value;
        self.value = 0;
        self.digits = 0;

        if value == HEX_END_MARKER {
            self.end_markers += 1;
            return match self.end_markers {
                1 => {
                    debug!("hex data end marker received");
                    Ok(HexWord::EndMarker(1))
                }
                2 => Ok(HexWord::EndMarker(2)),
                _ => Err(Fault::TooManyEndMarkers),
            };
        }

        if value > self.profile.max_sample() {
            return Err(Fault::SampleOutOfRange(value));
        }
        Ok(HexWord::Sample(self.profile.scale(value)))
    }
}
