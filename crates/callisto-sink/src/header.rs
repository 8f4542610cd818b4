//! FITS header cards and block padding.
//!
//! A header is a sequence of 80-character ASCII cards closed by `END` and
//! padded with spaces to a multiple of [`BLOCK_SIZE`]. Values use the fixed
//! format: strings start in column 11, numbers and logicals are
//! right-justified to column 30.

/// Size of a FITS logical record.
pub const BLOCK_SIZE: usize = 2880;

/// Length of one header card.
pub const CARD_LEN: usize = 80;

/// An in-progress FITS header.
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<String>,
}

impl Header {
    pub fn new() -> Self {
        Header::default()
    }

    fn push_value(&mut self, keyword: &str, value: String, comment: Option<&str>) {
        let mut card = format!("{keyword:<8}= {value}");
        if let Some(comment) = comment {
            card.push_str(" / ");
            card.push_str(comment);
        }
        self.cards.push(card);
    }

    pub fn logical(&mut self, keyword: &str, value: bool, comment: Option<&str>) -> &mut Self {
        let v = if value { "T" } else { "F" };
        self.push_value(keyword, format!("{v:>20}"), comment);
        self
    }

    pub fn int(&mut self, keyword: &str, value: i64, comment: Option<&str>) -> &mut Self {
        self.push_value(keyword, format!("{value:>20}"), comment);
        self
    }

    pub fn float(&mut self, keyword: &str, value: f64, comment: Option<&str>) -> &mut Self {
        self.push_value(keyword, format!("{:>20}", format_float(value)), comment);
        self
    }

    pub fn string(&mut self, keyword: &str, value: &str, comment: Option<&str>) -> &mut Self {
        let quoted = format!("'{:<8}'", value.replace('\'', "''"));
        self.push_value(keyword, format!("{quoted:<20}"), comment);
        self
    }

    pub fn comment(&mut self, text: &str) -> &mut Self {
        self.cards.push(format!("COMMENT {text}"));
        self
    }

    /// Number of cards so far, `END` excluded.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Serialize with `END` and block padding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.cards.len() + 1) * CARD_LEN);
        for card in self.cards.iter().map(String::as_str).chain(std::iter::once("END")) {
            let mut bytes: Vec<u8> = card
                .chars()
                .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
                .take(CARD_LEN)
                .collect();
            bytes.resize(CARD_LEN, b' ');
            out.extend_from_slice(&bytes);
        }
        pad_block(&mut out, b' ');
        out
    }
}

/// Pad `data` with `fill` to the next multiple of [`BLOCK_SIZE`].
pub fn pad_block(data: &mut Vec<u8>, fill: u8) {
    let rem = data.len() % BLOCK_SIZE;
    if rem != 0 {
        data.resize(data.len() + BLOCK_SIZE - rem, fill);
    }
}

/// Format a real value so that it always reads back as floating point.
fn format_float(value: f64) -> String {
    let plain = format!("{value}");
    let s = if plain.len() > 20 { format!("{value:E}") } else { plain };
    if s.contains(['.', 'E', 'N', 'i']) {
        s
    } else {
        format!("{s}.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(header: &Header, index: usize) -> String {
        let bytes = header.to_bytes();
        String::from_utf8(bytes[index * CARD_LEN..(index + 1) * CARD_LEN].to_vec()).unwrap()
    }

    #[test]
    fn fixed_format_positions() {
        let mut h = Header::new();
        h.logical("SIMPLE", true, Some("conforms to FITS"))
            .int("NAXIS", 2, None)
            .string("OBJECT", "Sun", Some("object description"));

        let simple = card(&h, 0);
        assert_eq!(&simple[..10], "SIMPLE  = ");
        assert_eq!(&simple[29..30], "T");
        assert!(simple.contains(" / conforms to FITS"));

        let naxis = card(&h, 1);
        assert_eq!(naxis.trim_end(), "NAXIS   =                    2");

        let object = card(&h, 2);
        assert_eq!(&object[10..20], "'Sun     '");
    }

    #[test]
    fn end_card_and_padding() {
        let mut h = Header::new();
        h.int("BITPIX", 8, None);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert_eq!(&bytes[CARD_LEN..CARD_LEN + 3], b"END");
        assert!(bytes[CARD_LEN + 3..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn long_cards_are_truncated() {
        let mut h = Header::new();
        h.string("ORIGIN", &"x".repeat(100), Some("Organization name"));
        assert_eq!(h.to_bytes().len(), BLOCK_SIZE);
        assert!(card(&h, 1).starts_with("END"));
    }

    #[test]
    fn quotes_are_doubled() {
        let mut h = Header::new();
        h.string("ORIGIN", "O'Brien", None);
        assert!(card(&h, 0).contains("'O''Brien'"));
    }

    #[test]
    fn floats_have_a_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-1.0), "-1.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(1e300), "1E300");
    }

    #[test]
    fn pad_block_keeps_exact_multiples() {
        let mut data = vec![0u8; BLOCK_SIZE];
        pad_block(&mut data, 0);
        assert_eq!(data.len(), BLOCK_SIZE);
        let mut data = vec![1u8; 10];
        pad_block(&mut data, 0);
        assert_eq!(data.len(), BLOCK_SIZE);
        assert_eq!(data[10], 0);
    }
}
