// mutf8.rs - The class file's modified UTF-8
//
// NUL is written as C0 80 and supplementary characters as two encoded
// surrogates, never as 4-byte sequences.

/// Decode a constant pool string
pub fn decode(bytes: &[u8]) -> Result<String, String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let unit = match b {
            0x01..=0x7f => {
                i += 1;
                u16::from(b)
            }
            0xc0..=0xdf => {
                let b2 = continuation(bytes, i + 1)?;
                i += 2;
                (u16::from(b & 0x1f) << 6) | b2
            }
            0xe0..=0xef => {
                let b2 = continuation(bytes, i + 1)?;
                let b3 = continuation(bytes, i + 2)?;
                i += 3;
                (u16::from(b & 0x0f) << 12) | (b2 << 6) | b3
            }
            _ => return Err(format!("invalid modified UTF-8 byte 0x{:02x} at {}", b, i)),
        };
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|e| e.to_string())
}

fn continuation(bytes: &[u8], i: usize) -> Result<u16, String> {
    match bytes.get(i) {
        Some(&b) if b & 0xc0 == 0x80 => Ok(u16::from(b & 0x3f)),
        _ => Err(format!("truncated modified UTF-8 sequence at {}", i)),
    }
}

/// Encode a string for the constant pool
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}
