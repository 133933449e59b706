//! String layout settings
//!
//! Game engines store strings in many shapes: null-terminated UTF-8,
//! UTF-16 with a character-count prefix, raw fixed buffers. A
//! [`StringSettings`] value describes one such shape; the encode/decode
//! halves here are pure so they can be tested without a process.

use crate::error::{MemoryError, MemoryResult};

/// Character encoding of an in-memory string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    /// One byte per code unit
    #[default]
    Utf8,
    /// Two bytes per code unit, little-endian
    Utf16Le,
}

impl StringEncoding {
    /// Size of one code unit in bytes
    pub fn unit_size(self) -> usize {
        match self {
            StringEncoding::Utf8 => 1,
            StringEncoding::Utf16Le => 2,
        }
    }
}

/// An integer length stored just before the string content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPrefix {
    /// Size of the stored integer: 1, 2, 4 or 8 bytes
    pub size_bytes: u8,
    /// Bytes each counted unit stands for (2 for a UTF-16 char count,
    /// 1 for a byte count)
    pub unit_bytes: u8,
}

/// Full description of a string's in-memory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringSettings {
    pub encoding: StringEncoding,
    /// Whether content ends at the first zero code unit
    pub null_terminated: bool,
    /// Length stored before the content, if any
    pub length_prefix: Option<LengthPrefix>,
    /// Cap on the content length in code units
    pub max_units: usize,
}

impl Default for StringSettings {
    fn default() -> Self {
        Self {
            encoding: StringEncoding::Utf8,
            null_terminated: true,
            length_prefix: None,
            max_units: 1024,
        }
    }
}

impl StringSettings {
    /// Null-terminated UTF-16, the common Windows layout
    pub fn utf16() -> Self {
        Self {
            encoding: StringEncoding::Utf16Le,
            ..Default::default()
        }
    }
}

/// Decode raw content bytes (no prefix) according to the settings.
///
/// Stops at the first zero code unit when `null_terminated` is set;
/// invalid sequences decode to the replacement character.
pub(crate) fn decode_content(settings: &StringSettings, data: &[u8]) -> String {
    match settings.encoding {
        StringEncoding::Utf8 => {
            let end = if settings.null_terminated {
                data.iter().position(|&b| b == 0).unwrap_or(data.len())
            } else {
                data.len()
            };
            String::from_utf8_lossy(&data[..end]).into_owned()
        }
        StringEncoding::Utf16Le => {
            let mut units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            if settings.null_terminated {
                if let Some(end) = units.iter().position(|&u| u == 0) {
                    units.truncate(end);
                }
            }
            String::from_utf16_lossy(&units)
        }
    }
}

/// Encode a string to the bytes stored in the target process: optional
/// length prefix, content, optional terminator.
pub(crate) fn encode(settings: &StringSettings, text: &str) -> MemoryResult<Vec<u8>> {
    let content: Vec<u8> = match settings.encoding {
        StringEncoding::Utf8 => text.as_bytes().to_vec(),
        StringEncoding::Utf16Le => text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect(),
    };

    let unit_size = settings.encoding.unit_size();
    let units = content.len() / unit_size;
    if units > settings.max_units {
        return Err(MemoryError::InvalidArgument(format!(
            "string of {units} units exceeds the cap of {}",
            settings.max_units
        )));
    }

    let mut bytes = Vec::new();
    if let Some(prefix) = settings.length_prefix {
        let count = (content.len() / usize::from(prefix.unit_bytes)) as u64;
        let encoded = count.to_le_bytes();
        match prefix.size_bytes {
            1 | 2 | 4 | 8 => bytes.extend_from_slice(&encoded[..usize::from(prefix.size_bytes)]),
            other => {
                return Err(MemoryError::InvalidArgument(format!(
                    "unsupported length-prefix size: {other}"
                )))
            }
        }
    }
    bytes.extend_from_slice(&content);
    if settings.null_terminated {
        bytes.extend(std::iter::repeat(0u8).take(unit_size));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_null_terminated() {
        let settings = StringSettings::default();
        let data = b"hello\0garbage";
        assert_eq!(decode_content(&settings, data), "hello");
    }

    #[test]
    fn test_decode_utf8_fixed_buffer() {
        let settings = StringSettings {
            null_terminated: false,
            ..Default::default()
        };
        assert_eq!(decode_content(&settings, b"abc"), "abc");
    }

    #[test]
    fn test_decode_utf16() {
        let settings = StringSettings::utf16();
        let data = [0x68, 0x00, 0x69, 0x00, 0x00, 0x00, 0xFF, 0xFF];
        assert_eq!(decode_content(&settings, &data), "hi");
    }

    #[test]
    fn test_encode_utf8_with_terminator() {
        let settings = StringSettings::default();
        assert_eq!(encode(&settings, "hi").unwrap(), b"hi\0");
    }

    #[test]
    fn test_encode_utf16_with_char_count_prefix() {
        let settings = StringSettings {
            encoding: StringEncoding::Utf16Le,
            null_terminated: false,
            length_prefix: Some(LengthPrefix {
                size_bytes: 2,
                unit_bytes: 2,
            }),
            max_units: 1024,
        };
        let bytes = encode(&settings, "hi").unwrap();
        // 2-character count, then the UTF-16 units
        assert_eq!(bytes, vec![0x02, 0x00, 0x68, 0x00, 0x69, 0x00]);
    }

    #[test]
    fn test_encode_respects_cap() {
        let settings = StringSettings {
            max_units: 3,
            ..Default::default()
        };
        assert!(encode(&settings, "abcd").is_err());
        assert!(encode(&settings, "abc").is_ok());
    }
}
