//! Outer transform around the JSON payload: percent escaping, hex case,
//! separator layout and surrounding whitespace, recorded at decode time so an
//! unedited document re-encodes to the same bytes.

use std::io;

use serde::Serialize;
use serde_json::ser::{CompactFormatter, Formatter, Serializer};

use crate::error::EncodeError;
use crate::node::Node;

const UPPER_HEX: &[u8; 16] = b"0123456789ABCDEF";
const LOWER_HEX: &[u8; 16] = b"0123456789abcdef";

/// Bytes left literal by the canonical writer: `A-Z a-z 0-9 - _ . ~ /`.
const fn canonical_mask() -> u128 {
    let mut mask = 0u128;
    let mut byte = 0u8;
    while byte < 0x80 {
        let literal = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || byte == b'.'
            || byte == b'~'
            || byte == b'/';
        if !literal {
            mask |= 1u128 << byte;
        }
        byte += 1;
    }
    mask
}

const CANONICAL_MASK: u128 = canonical_mask();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexCase {
    Upper,
    Lower,
}

/// Which ASCII bytes are written as `%XX`. Non-ASCII bytes are always escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeProfile {
    escaped: u128,
    hex_case: HexCase,
}

impl Default for EscapeProfile {
    fn default() -> Self {
        Self {
            escaped: CANONICAL_MASK,
            hex_case: HexCase::Upper,
        }
    }
}

impl EscapeProfile {
    pub fn is_escaped(&self, byte: u8) -> bool {
        byte >= 0x80 || self.escaped & (1u128 << byte) != 0
    }

    pub fn hex_case(&self) -> HexCase {
        self.hex_case
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::default()
    }

    /// Learns the profile from raw (still escaped) artifact text.
    pub fn detect(raw: &str) -> Self {
        let bytes = raw.as_bytes();
        let mut escaped = CANONICAL_MASK;
        let mut saw_lower = false;
        let mut saw_upper = false;
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            if byte == b'%' && i + 2 < bytes.len() {
                if let Some(value) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                    if value < 0x80 {
                        escaped |= 1u128 << value;
                    }
                    for digit in [bytes[i + 1], bytes[i + 2]] {
                        saw_lower |= digit.is_ascii_lowercase();
                        saw_upper |= digit.is_ascii_uppercase();
                    }
                    i += 3;
                    continue;
                }
            }
            if byte < 0x80 {
                escaped &= !(1u128 << byte);
            }
            i += 1;
        }
        // A literal '%' would be read back as the start of an escape.
        escaped |= 1u128 << b'%';
        let hex_case = if saw_lower && !saw_upper {
            HexCase::Lower
        } else {
            HexCase::Upper
        };
        Self { escaped, hex_case }
    }

    pub fn apply(&self, text: &str) -> String {
        let table = match self.hex_case {
            HexCase::Upper => UPPER_HEX,
            HexCase::Lower => LOWER_HEX,
        };
        let mut out = String::with_capacity(text.len() * 3 / 2);
        for &byte in text.as_bytes() {
            if self.is_escaped(byte) {
                out.push('%');
                out.push(table[usize::from(byte >> 4)] as char);
                out.push(table[usize::from(byte & 0x0f)] as char);
            } else {
                out.push(byte as char);
            }
        }
        out
    }
}

fn hex_pair(high: u8, low: u8) -> Option<u8> {
    let high = (high as char).to_digit(16)?;
    let low = (low as char).to_digit(16)?;
    u8::try_from(high * 16 + low).ok()
}

/// Separator layout of the JSON payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JsonLayout {
    /// `{"a":1,"b":[1,2]}`, as the game writes it.
    #[default]
    Compact,
    /// `{"a": 1, "b": [1, 2]}`.
    Spaced,
}

impl JsonLayout {
    pub fn render(self, node: &Node) -> Result<String, EncodeError> {
        let mut buf = Vec::new();
        match self {
            JsonLayout::Compact => {
                let mut serializer = Serializer::with_formatter(&mut buf, CompactFormatter);
                node.serialize(&mut serializer)?;
            }
            JsonLayout::Spaced => {
                let mut serializer = Serializer::with_formatter(&mut buf, SpacedFormatter);
                node.serialize(&mut serializer)?;
            }
        }
        // serde_json only emits UTF-8.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Picks the layout whose rendering of `node` matches `text` exactly.
    pub fn detect(node: &Node, text: &str) -> Self {
        for layout in [JsonLayout::Compact, JsonLayout::Spaced] {
            if layout.render(node).is_ok_and(|rendered| rendered == text) {
                return layout;
            }
        }
        log::debug!("payload layout is not canonical; re-encoding compact");
        JsonLayout::Compact
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub escapes: EscapeProfile,
    pub layout: JsonLayout,
    pub leading: String,
    pub trailing: String,
}

impl Envelope {
    pub fn is_canonical(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_profile_matches_uri_component_style() {
        let profile = EscapeProfile::default();
        assert_eq!(profile.apply("{\"a\":\"b c/d\"}"), "%7B%22a%22%3A%22b%20c/d%22%7D");
        assert_eq!(profile.apply("é"), "%C3%A9");
    }

    #[test]
    fn detect_learns_literal_bytes_and_lower_hex() {
        let raw = "%7b%22a%22:1%7d";
        let profile = EscapeProfile::detect(raw);
        assert_eq!(profile.hex_case(), HexCase::Lower);
        assert!(!profile.is_escaped(b':'));
        assert!(profile.is_escaped(b'{'));
        assert_eq!(profile.apply("{\"a\":1}"), raw);
    }

    #[test]
    fn spaced_layout_uses_python_separators() {
        let node = Node::from(serde_json::json!({"a": [1, 2], "b": {"c": null}}));
        assert_eq!(
            JsonLayout::Spaced.render(&node).expect("render"),
            "{\"a\": [1, 2], \"b\": {\"c\": null}}"
        );
        assert_eq!(
            JsonLayout::detect(&node, "{\"a\": [1, 2], \"b\": {\"c\": null}}"),
            JsonLayout::Spaced
        );
    }
}
