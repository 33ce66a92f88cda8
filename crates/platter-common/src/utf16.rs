//! Fixed-width little-endian UTF-16 name fields, as used by GPT partition
//! entries (36 code units, null padded).

use crate::endian::LittleEndian;
use crate::num::U16;

#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct FixedUtf16Str<const N: usize> {
    units: [U16<LittleEndian>; N],
}

unsafe impl<const N: usize> bytemuck::Zeroable for FixedUtf16Str<N> {}
unsafe impl<const N: usize> bytemuck::Pod for FixedUtf16Str<N> {}

impl<const N: usize> FixedUtf16Str<N> {
    pub fn empty() -> Self {
        Self {
            units: [U16::new(0); N],
        }
    }

    /// Encodes `s`, truncating to `N` UTF-16 code units.
    pub fn from_str(s: &str) -> Self {
        let mut units = [U16::new(0); N];
        for (slot, unit) in units.iter_mut().zip(s.encode_utf16()) {
            slot.set(unit);
        }
        Self { units }
    }

    /// Decodes up to the first null, replacing unpaired surrogates.
    pub fn to_string_lossy(&self) -> String {
        let len = self
            .units
            .iter()
            .position(|u| u.get() == 0)
            .unwrap_or(N);
        let raw: Vec<u16> = self.units[..len].iter().map(|u| u.get()).collect();
        String::from_utf16_lossy(&raw)
    }
}

impl<const N: usize> PartialEq for FixedUtf16Str<N> {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(self) == bytemuck::bytes_of(other)
    }
}

impl<const N: usize> Eq for FixedUtf16Str<N> {}

impl<const N: usize> core::fmt::Debug for FixedUtf16Str<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl<const N: usize> core::fmt::Display for FixedUtf16Str<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}
