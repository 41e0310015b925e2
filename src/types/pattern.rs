use std::fmt;

/// One element of a hex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexToken {
    /// A byte compared under `mask`; `?` nibbles clear the corresponding
    /// mask bits (`4?` is `value: 0x40, mask: 0xF0`).
    Byte { value: u8, mask: u8 },
    /// `[min-max]` arbitrary bytes; `max: None` is unbounded.
    Jump { min: u32, max: Option<u32> },
    /// `( AA | BB CC )`
    Alt(Vec<Vec<HexToken>>),
}

/// The body of a string declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `"text"` after escape processing.
    Text(Vec<u8>),
    /// `{ 4D 5A ?? }`
    Hex(Vec<HexToken>),
    /// `/regex/`, without the delimiters; `i`/`s` suffixes become modifiers.
    Regex(String),
}

impl HexToken {
    /// True for a fully specified byte.
    pub(crate) fn is_exact_byte(&self) -> bool {
        matches!(self, HexToken::Byte { mask: 0xFF, .. })
    }
}

impl Pattern {
    /// Textual form exposed as the string's value.
    ///
    /// Text keeps its UTF-8 characters, writes a backslash as `\\` and any
    /// byte that is not part of valid UTF-8 as `\xHH`, so two different
    /// byte strings never share a value.
    #[must_use]
    pub fn display_value(&self) -> String {
        match self {
            Pattern::Text(bytes) => escape_text(bytes),
            Pattern::Hex(tokens) => format!("{{ {} }}", join_hex(tokens)),
            Pattern::Regex(re) => re.clone(),
        }
    }
}

fn escape_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == '\\' {
                out.push_str("\\\\");
            } else {
                out.push(c);
            }
        }
        for &byte in chunk.invalid() {
            out.push_str("\\x");
            out.push(hex_digit(byte >> 4));
            out.push(hex_digit(byte & 0x0F));
        }
    }
    out
}

fn join_hex(tokens: &[HexToken]) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for HexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexToken::Byte { value, mask } => {
                let hi = if mask & 0xF0 == 0 {
                    '?'
                } else {
                    hex_digit(value >> 4)
                };
                let lo = if mask & 0x0F == 0 {
                    '?'
                } else {
                    hex_digit(value & 0x0F)
                };
                write!(f, "{hi}{lo}")
            }
            HexToken::Jump { min, max: Some(max) } if min == max => write!(f, "[{min}]"),
            HexToken::Jump { min, max: Some(max) } => write!(f, "[{min}-{max}]"),
            HexToken::Jump { min, max: None } => write!(f, "[{min}-]"),
            HexToken::Alt(branches) => {
                let parts: Vec<String> = branches.iter().map(|b| join_hex(b)).collect();
                write!(f, "( {} )", parts.join(" | "))
            }
        }
    }
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16)
        .unwrap_or('0')
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &[u8]) -> String {
        Pattern::Text(bytes.to_vec()).display_value()
    }

    /// Inverse of the text escaping, for checking it loses nothing.
    fn unescape(value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut rest = value;
        while let Some(c) = rest.chars().next() {
            if let Some(tail) = rest.strip_prefix("\\\\") {
                out.push(b'\\');
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("\\x") {
                out.push(u8::from_str_radix(&tail[..2], 16).unwrap());
                rest = &tail[2..];
            } else {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                rest = &rest[c.len_utf8()..];
            }
        }
        out
    }

    #[test]
    fn utf8_text_is_kept() {
        assert_eq!(text(b"abc"), "abc");
        assert_eq!(text(" caf\u{e9} ".as_bytes()), " caf\u{e9} ");
    }

    #[test]
    fn non_utf8_bytes_are_escaped() {
        assert_eq!(text(b"\xFF\xFE"), r"\xFF\xFE");
        assert_eq!(text(b"\xC0\x80"), r"\xC0\x80");
        assert_eq!(text(b"ab\xE2\x82"), r"ab\xE2\x82");
        assert_ne!(text(b"\xFF\xFE"), text(b"\xC0\x80"));
    }

    #[test]
    fn escaped_text_is_reversible() {
        let samples: [&[u8]; 6] = [
            b"plain",
            b"back\\slash",
            br"\xFF",
            b"\xFF",
            b"\x00mixed\xC3\xA9\xC3",
            b"",
        ];
        for sample in samples {
            assert_eq!(unescape(&text(sample)), sample, "{sample:?}");
        }
        assert_ne!(text(br"\xFF"), text(b"\xFF"));
    }

    #[test]
    fn hex_value_is_canonical() {
        let pattern = Pattern::Hex(vec![
            HexToken::Byte { value: 0x4D, mask: 0xFF },
            HexToken::Byte { value: 0x50, mask: 0xF0 },
            HexToken::Byte { value: 0, mask: 0 },
            HexToken::Jump { min: 2, max: Some(4) },
            HexToken::Alt(vec![
                vec![HexToken::Byte { value: 0, mask: 0xFF }],
                vec![HexToken::Byte { value: 1, mask: 0xFF }],
            ]),
        ]);
        assert_eq!(pattern.display_value(), "{ 4D 5? ?? [2-4] ( 00 | 01 ) }");
    }
}
