//! Line reader shared by all Callisto text files.
//!
//! Every file is read line by line. `//` and `/*` start a comment that runs
//! to the end of the line (there is no closing `*/`). Leading and trailing
//! whitespace is dropped and blank lines are skipped. Key/value files use
//! `[key] = value` lines; keys are case-insensitive and returned lowercased.

use tracing::warn;

use callisto_core::error::{Error, Result};

/// Longest accepted line, including its line terminator.
pub const MAX_LINE: usize = 1024;

/// One `[key] = value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key, lowercased.
    pub key: String,
    pub value: String,
    /// 1-based line number, for diagnostics.
    pub line: usize,
}

/// Return the relevant content of every non-blank line, with its 1-based
/// line number.
///
/// A line that does not fit into [`MAX_LINE`] bytes fails the whole file.
pub fn content_lines(text: &str) -> Result<Vec<(usize, &str)>> {
    let mut out = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let number = index + 1;
        if raw.len() + 1 >= MAX_LINE {
            return Err(Error::Config(format!("line {number} too long")));
        }
        let content = strip_comment(raw).trim();
        if !content.is_empty() {
            out.push((number, content));
        }
    }
    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    let mut end = line.len();
    for marker in ["//", "/*"] {
        if let Some(pos) = line.find(marker) {
            end = end.min(pos);
        }
    }
    &line[..end]
}

/// Split one content line into key and value.
///
/// Returns `None` for anything that is not `[key] = value`.
pub fn split_key_value(content: &str) -> Option<(String, &str)> {
    let rest = content.strip_prefix('[')?;
    let close = rest.find(']')?;
    let key = &rest[..close];
    let value = rest[close + 1..].trim_start().strip_prefix('=')?;
    Some((key.to_ascii_lowercase(), value.trim_start()))
}

/// Parse a key/value file. Malformed lines are logged and skipped.
pub fn key_values(text: &str) -> Result<Vec<KeyValue>> {
    let mut out = Vec::new();
    for (line, content) in content_lines(text)? {
        match split_key_value(content) {
            Some((key, value)) => out.push(KeyValue {
                key,
                value: value.to_string(),
                line,
            }),
            None => warn!(line, content, "malformed configuration file line"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_dropped() {
        let text = "// header\n\n  [a] = 1 // trailing\n[b]=2/* old */\n   \t\n";
        let lines = content_lines(text).unwrap();
        assert_eq!(lines, vec![(3, "[a] = 1"), (4, "[b]=2")]);
    }

    #[test]
    fn keys_are_lowercased_values_kept() {
        let kv = key_values("[RxComPort] = /dev/ttyUSB0\n[Origin]=Space Lab\n").unwrap();
        assert_eq!(kv[0].key, "rxcomport");
        assert_eq!(kv[0].value, "/dev/ttyUSB0");
        assert_eq!(kv[1].key, "origin");
        assert_eq!(kv[1].value, "Space Lab");
        assert_eq!(kv[1].line, 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let kv = key_values("no brackets\n[open = 1\n[key] 1\n[ok]=yes\n").unwrap();
        assert_eq!(kv.len(), 1);
        assert_eq!(kv[0].key, "ok");
    }

    #[test]
    fn empty_value_is_allowed() {
        let (key, value) = split_key_value("[ovspath] =").unwrap();
        assert_eq!(key, "ovspath");
        assert_eq!(value, "");
    }

    #[test]
    fn overlong_line_fails() {
        let text = format!("[a]={}\n", "x".repeat(MAX_LINE));
        assert!(matches!(content_lines(&text), Err(Error::Config(_))));
    }
}
