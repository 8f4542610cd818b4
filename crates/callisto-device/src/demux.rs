//! Byte classification for the inbound device stream.
//!
//! Every inbound byte belongs to exactly one of three channels:
//!
//! - **messages**: `$` ... `\r`, ASCII status lines such as `CRX:Started`;
//! - **bulk data**: `2` ... `&`, hex-encoded samples for the decoder;
//! - **markers**: the lone `]` sent after an EEPROM write, ignored here.
//!
//! A message may interrupt the bulk region; the data channel resumes after
//! the message ends. Anything else arriving outside both is a protocol
//! violation.

use crate::protocol::{DATA_END, DATA_START, EEPROM_READY, MAX_MESSAGE, MESSAGE_END, MESSAGE_START};

/// What the demultiplexer made of one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// A complete status message (delimiters stripped).
    Message(String),
    /// A byte inside the bulk-data region, to be hex-decoded.
    Data(u8),
    /// The bulk-data region ended.
    DataEnd,
    /// A byte that fits no channel.
    Unexpected(u8),
}

/// Stream demultiplexer state.
#[derive(Debug, Default)]
pub struct Demux {
    message: Option<Vec<u8>>,
    in_data: bool,
}

impl Demux {
    /// Create a demultiplexer in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the bulk-data region is open.
    pub fn in_data(&self) -> bool {
        self.in_data
    }

    /// Return to the idle state, dropping any partial message.
    pub fn reset(&mut self) {
        self.message = None;
        self.in_data = false;
    }

    /// Classify one byte. Returns `None` for bytes absorbed without an event
    /// (delimiters, message bodies, markers).
    pub fn push(&mut self, byte: u8) -> Option<DemuxEvent> {
        if let Some(message) = self.message.as_mut() {
            if byte == MESSAGE_END {
                let text = String::from_utf8_lossy(message).into_owned();
                self.message = None;
                return Some(DemuxEvent::Message(text));
            }
            if message.len() < MAX_MESSAGE {
                message.push(byte);
            }
            return None;
        }

        match byte {
            MESSAGE_START => {
                self.message = Some(Vec::with_capacity(MAX_MESSAGE));
                None
            }
            EEPROM_READY => None,
            DATA_START if !self.in_data => {
                self.in_data = true;
                None
            }
            DATA_END if self.in_data => {
                self.in_data = false;
                Some(DemuxEvent::DataEnd)
            }
            _ if self.in_data => Some(DemuxEvent::Data(byte)),
            _ => Some(DemuxEvent::Unexpected(byte)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(demux: &mut Demux, bytes: &[u8]) -> Vec<DemuxEvent> {
        bytes.iter().filter_map(|&b| demux.push(b)).collect()
    }

    #[test]
    fn message_is_dispatched_on_terminator() {
        let mut d = Demux::new();
        assert_eq!(
            feed(&mut d, b"$CRX:Started\r"),
            vec![DemuxEvent::Message("CRX:Started".into())]
        );
    }

    #[test]
    fn long_message_is_truncated() {
        let mut d = Demux::new();
        let mut input = vec![b'$'];
        input.extend(std::iter::repeat(b'x').take(300));
        input.push(b'\r');
        match feed(&mut d, &input).as_slice() {
            [DemuxEvent::Message(m)] => assert_eq!(m.len(), MAX_MESSAGE),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn data_region_forwards_bytes() {
        let mut d = Demux::new();
        let events = feed(&mut d, b"20A2F&");
        assert_eq!(
            events,
            vec![
                DemuxEvent::Data(b'0'),
                DemuxEvent::Data(b'A'),
                DemuxEvent::Data(b'2'),
                DemuxEvent::Data(b'F'),
                DemuxEvent::DataEnd,
            ]
        );
        assert!(!d.in_data());
    }

    #[test]
    fn message_inside_data_region() {
        let mut d = Demux::new();
        let events = feed(&mut d, b"2AB$CRX:x\rCD");
        assert_eq!(
            events,
            vec![
                DemuxEvent::Data(b'A'),
                DemuxEvent::Data(b'B'),
                DemuxEvent::Message("CRX:x".into()),
                DemuxEvent::Data(b'C'),
                DemuxEvent::Data(b'D'),
            ]
        );
    }

    #[test]
    fn marker_is_ignored_when_idle() {
        let mut d = Demux::new();
        assert!(feed(&mut d, b"]]]").is_empty());
    }

    #[test]
    fn stray_byte_when_idle_is_unexpected() {
        let mut d = Demux::new();
        assert_eq!(feed(&mut d, b"X"), vec![DemuxEvent::Unexpected(b'X')]);
        assert_eq!(feed(&mut d, b"&"), vec![DemuxEvent::Unexpected(b'&')]);
        assert_eq!(feed(&mut d, b"\r"), vec![DemuxEvent::Unexpected(b'\r')]);
    }

    #[test]
    fn reset_drops_partial_message() {
        let mut d = Demux::new();
        feed(&mut d, b"2$CRX:par");
        d.reset();
        assert!(!d.in_data());
        assert_eq!(feed(&mut d, b"A"), vec![DemuxEvent::Unexpected(b'A')]);
    }
}
