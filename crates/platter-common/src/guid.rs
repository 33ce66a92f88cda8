//! The GUID codec used by GPT.
//!
//! Textual form is the usual `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`. The
//! on-disk form is mixed-endian: the first three fields are little-endian,
//! the last two are stored byte-for-byte as written.

use core::fmt;
use core::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuidError {
    #[error("invalid GUID: expected 36 characters of the form 8-4-4-4-12, got {0:?}")]
    InvalidGuid(String),
}

/// A GUID held in its 16-byte mixed-endian on-disk representation.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Guid([u8; 16]);

impl Default for Guid {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Guid {
    /// The all-zero GUID, marking unused partition slots.
    pub const ZERO: Self = Self([0; 16]);

    /// EFI System Partition (`C12A7328-F81F-11D2-BA4B-00A0C93EC93B`).
    pub const EFI_SYSTEM: Self = Self([
        0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9,
        0x3B,
    ]);

    /// Microsoft basic data (`EBD0A0A2-B9E5-4433-87C0-68B6B72699C7`).
    pub const BASIC_DATA: Self = Self([
        0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99,
        0xC7,
    ]);

    /// Linux filesystem data (`0FC63DAF-8483-4772-8E79-3D69D8477DE4`).
    pub const LINUX_FILESYSTEM: Self = Self([
        0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47, 0x7D,
        0xE4,
    ]);

    /// BIOS boot partition (`21686148-6449-6E6F-744E-656564454649`).
    pub const BIOS_BOOT: Self = Self([
        0x48, 0x61, 0x68, 0x21, 0x49, 0x64, 0x6F, 0x6E, 0x74, 0x4E, 0x65, 0x65, 0x64, 0x45, 0x46,
        0x49,
    ]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The mixed-endian on-disk bytes.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    /// A fresh random (version 4) GUID.
    pub fn generate() -> Self {
        let mut bytes: [u8; 16] = rand::random();
        // Version and variant nibbles live at logical bytes 6 and 8; byte 6
        // sits at disk offset 7 because the third field is little-endian.
        bytes[7] = (bytes[7] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self(bytes)
    }

    /// Parses the 36-character textual form. Fails on any other length,
    /// misplaced hyphens, or non-hex digits.
    pub fn parse(s: &str) -> Result<Self, GuidError> {
        let bytes = s.as_bytes();
        if bytes.len() != 36 {
            return Err(GuidError::InvalidGuid(s.to_string()));
        }
        let mut logical = [0u8; 16];
        let mut out = 0;
        let mut i = 0;
        while i < 36 {
            if matches!(i, 8 | 13 | 18 | 23) {
                if bytes[i] != b'-' {
                    return Err(GuidError::InvalidGuid(s.to_string()));
                }
                i += 1;
                continue;
            }
            let hi = hex_nibble(bytes[i]).ok_or_else(|| GuidError::InvalidGuid(s.to_string()))?;
            let lo =
                hex_nibble(bytes[i + 1]).ok_or_else(|| GuidError::InvalidGuid(s.to_string()))?;
            logical[out] = (hi << 4) | lo;
            out += 1;
            i += 2;
        }

        let l = logical;
        Ok(Self([
            l[3], l[2], l[1], l[0], l[5], l[4], l[7], l[6], l[8], l[9], l[10], l[11], l[12], l[13],
            l[14], l[15],
        ]))
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.0;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            d[3], d[2], d[1], d[0], d[5], d[4], d[7], d[6], d[8], d[9], d[10], d[11], d[12], d[13],
            d[14], d[15],
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format_round_trip() {
        let text = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
        let guid = Guid::parse(text).unwrap();
        assert_eq!(guid, Guid::EFI_SYSTEM);
        assert_eq!(guid.to_string(), text);

        // Lowercase input formats back uppercase.
        let lower = Guid::parse(&text.to_lowercase()).unwrap();
        assert_eq!(lower.to_string(), text);
    }

    #[test]
    fn bytes_round_trip() {
        let guid = Guid::parse("0FC63DAF-8483-4772-8E79-3D69D8477DE4").unwrap();
        assert_eq!(Guid::from_bytes(guid.to_bytes()), guid);
        assert_eq!(guid, Guid::LINUX_FILESYSTEM);
    }

    #[test]
    fn mixed_endian_layout() {
        let guid = Guid::parse("00112233-4455-6677-8899-AABBCCDDEEFF").unwrap();
        assert_eq!(
            guid.to_bytes(),
            [
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
                0xDD, 0xEE, 0xFF
            ]
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Guid::parse("").is_err());
        assert!(Guid::parse("C12A7328F81F11D2BA4B00A0C93EC93B").is_err());
        assert!(Guid::parse("C12A7328-F81F-11D2-BA4B-00A0C93EC93G").is_err());
        assert!(Guid::parse("C12A7328+F81F-11D2-BA4B-00A0C93EC93B").is_err());
    }

    #[test]
    fn generated_guids_are_v4_and_distinct() {
        let a = Guid::generate();
        let b = Guid::generate();
        assert_ne!(a, b);
        let text = a.to_string();
        assert_eq!(&text[14..15], "4");
    }
}
