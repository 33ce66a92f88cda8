use crc::{CRC_32_ISO_HDLC, Crc};

static HASHER: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 as used by GPT headers and entry arrays (IEEE 802.3 polynomial,
/// reflected, init and xor-out all ones).
pub fn crc32(data: &[u8]) -> u32 {
    HASHER.checksum(data)
}

/// Incremental CRC-32 for callers that checksum discontiguous ranges.
pub struct Crc32Digest(crc::Digest<'static, u32>);

impl Crc32Digest {
    pub fn new() -> Self {
        Self(HASHER.digest())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

impl Default for Crc32Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // The classic check value for this polynomial.
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn digest_matches_oneshot() {
        let mut digest = Crc32Digest::new();
        digest.update(b"1234");
        digest.update(b"56789");
        assert_eq!(digest.finalize(), crc32(b"123456789"));
    }
}
