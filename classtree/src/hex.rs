// hex.rs - Hexadecimal payloads carried by tree leaves
//
// Every leaf of a class tree holds its value as hex text. The text form is
// canonical: uppercase byte pairs separated by single spaces, so two equal
// payloads are also equal as strings.

use crate::error::{Error, Result};
use std::fmt;

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// A leaf payload, stored as raw bytes and printed canonically
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Hex(Vec<u8>);

impl Hex {
    pub fn new(bytes: Vec<u8>) -> Self {
        Hex(bytes)
    }

    /// Parse hex text, ignoring whitespace between bytes
    pub fn parse(text: &str) -> Result<Self> {
        let mut bytes = Vec::with_capacity(text.len() / 3 + 1);
        let mut high: Option<u8> = None;
        for ch in text.chars() {
            if ch.is_ascii_whitespace() {
                if high.is_some() {
                    return Err(Error::payload(text, "whitespace inside a byte"));
                }
                continue;
            }
            let nibble = ch
                .to_digit(16)
                .ok_or_else(|| Error::payload(text, format!("'{}' is not a hex digit", ch)))?
                as u8;
            match high.take() {
                Some(h) => bytes.push(h << 4 | nibble),
                None => high = Some(nibble),
            }
        }
        if high.is_some() {
            return Err(Error::payload(text, "odd number of hex digits"));
        }
        Ok(Hex(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Hex {
    fn from(bytes: &[u8]) -> Self {
        Hex(bytes.to_vec())
    }
}

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = String::with_capacity(self.0.len() * 3);
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            text.push(DIGITS[(byte >> 4) as usize] as char);
            text.push(DIGITS[(byte & 0x0f) as usize] as char);
        }
        f.write_str(&text)
    }
}
