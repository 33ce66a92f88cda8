//! Character sets, fixed-width identifier strings and the both-endian
//! integer pairs that ISO 9660 structures are built from.

use core::marker::PhantomData;

use platter_common::num::{U16Be, U16Le, U32Be, U32Le};

use crate::IsoError;

/// A constrained character repertoire for identifier fields.
pub trait Charset: Copy + PartialEq + Eq {
    fn is_valid(chars: &[u8]) -> bool;
}

/// `a-characters`: alphanumerics, space and a handful of punctuation.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetA;

/// `d-characters`: uppercase letters, digits and underscore.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CharsetD;

impl Charset for CharsetA {
    fn is_valid(chars: &[u8]) -> bool {
        const SYMBOLS: &[u8] = b" !\"%&'()*+,-./:;<=>?_";
        chars
            .iter()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase() || SYMBOLS.contains(c))
    }
}

impl Charset for CharsetD {
    fn is_valid(chars: &[u8]) -> bool {
        chars
            .iter()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == b'_')
    }
}

/// A space-padded fixed-width string of `N` bytes from charset `C`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IsoStr<C: Charset, const N: usize> {
    chars: [u8; N],
    _marker: PhantomData<C>,
}

unsafe impl<C: Charset, const N: usize> bytemuck::Zeroable for IsoStr<C, N> {}
unsafe impl<C: Charset + 'static, const N: usize> bytemuck::Pod for IsoStr<C, N> {}

impl<C: Charset, const N: usize> IsoStr<C, N> {
    pub fn empty() -> Self {
        Self {
            chars: [b' '; N],
            _marker: PhantomData,
        }
    }

    pub fn from_str(s: &str) -> Result<Self, IsoError> {
        if s.len() > N || !C::is_valid(s.as_bytes()) {
            return Err(IsoError::InvalidName(s.to_string()));
        }
        let mut chars = [b' '; N];
        chars[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self {
            chars,
            _marker: PhantomData,
        })
    }

    pub const fn from_bytes_exact(chars: [u8; N]) -> Self {
        Self {
            chars,
            _marker: PhantomData,
        }
    }

    /// Length up to the space padding.
    pub fn len(&self) -> usize {
        let mut len = N;
        while len > 0 && self.chars[len - 1] == b' ' {
            len -= 1;
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_str(&self) -> &str {
        // Identifier fields only ever hold ASCII.
        core::str::from_utf8(&self.chars[..self.len()]).unwrap_or("")
    }
}

impl<C: Charset, const N: usize> core::fmt::Display for IsoStr<C, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.to_str())
    }
}

impl<C: Charset, const N: usize> core::fmt::Debug for IsoStr<C, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.to_str())
    }
}

pub type IsoStrA<const N: usize> = IsoStr<CharsetA, N>;
pub type IsoStrD<const N: usize> = IsoStr<CharsetD, N>;

/// Canonicalizes an arbitrary file or directory name into the on-disk
/// identifier repertoire: letters upper-cased, spaces and interior dots
/// stripped, anything else mapped to `_`, clamped to 30 visible bytes.
///
/// Files keep a single `.ext` separator and gain the mandatory `;1`
/// version suffix; directories take the bare form. The function is
/// idempotent: feeding its output back in returns it unchanged.
pub fn canonical_name(name: &str, directory: bool) -> String {
    let trimmed = name.strip_suffix(";1").unwrap_or(name);
    let (stem, ext) = if directory {
        (trimmed, None)
    } else {
        match trimmed.rsplit_once('.') {
            Some((s, e)) if !s.is_empty() => (s, Some(e)),
            _ => (trimmed, None),
        }
    };

    fn map(part: &str) -> String {
        part.chars()
            .filter(|c| *c != ' ' && *c != '.')
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    let mut stem = map(stem);
    let ext = ext
        .map(|e| {
            let mut e = map(e);
            // Leave room for at least one stem byte and the separator.
            e.truncate(28);
            e
        })
        .filter(|e| !e.is_empty());

    let visible_budget = 30 - ext.as_ref().map(|e| e.len() + 1).unwrap_or(0);
    stem.truncate(visible_budget);

    if directory {
        stem
    } else {
        match ext {
            Some(ext) => format!("{stem}.{ext};1"),
            None => format!("{stem};1"),
        }
    }
}

/// Validates a canonical identifier without rewriting it. Directories take
/// `A–Z 0–9 _` up to 30 bytes; files the same with an optional single dot
/// and the `;1` suffix.
pub fn validate_name(name: &str, directory: bool) -> Result<(), IsoError> {
    let bad = || IsoError::InvalidName(name.to_string());
    if directory {
        if name.is_empty() || name.len() > 30 || !CharsetD::is_valid(name.as_bytes()) {
            return Err(bad());
        }
        return Ok(());
    }
    let visible = name.strip_suffix(";1").ok_or_else(bad)?;
    if visible.is_empty() || visible.len() > 30 {
        return Err(bad());
    }
    let (stem, ext) = visible.split_once('.').unwrap_or((visible, ""));
    if stem.is_empty()
        || !CharsetD::is_valid(stem.as_bytes())
        || !CharsetD::is_valid(ext.as_bytes())
        || ext.contains('.')
    {
        return Err(bad());
    }
    Ok(())
}

/// A value stored twice, little-endian first, then big-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct U16LsbMsb {
    lsb: U16Le,
    msb: U16Be,
}

impl U16LsbMsb {
    pub fn new(value: u16) -> Self {
        Self {
            lsb: U16Le::new(value),
            msb: U16Be::new(value),
        }
    }

    pub fn read(&self) -> u16 {
        self.lsb.get()
    }

    /// Decodes both halves and demands that they agree.
    pub fn read_checked(&self) -> Result<u16, IsoError> {
        let (l, m) = (self.lsb.get(), self.msb.get());
        if l != m {
            return Err(IsoError::InvalidFormat("both-endian u16 disagreement"));
        }
        Ok(l)
    }

    pub fn write(&mut self, value: u16) {
        self.lsb.set(value);
        self.msb.set(value);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct U32LsbMsb {
    lsb: U32Le,
    msb: U32Be,
}

impl U32LsbMsb {
    pub fn new(value: u32) -> Self {
        Self {
            lsb: U32Le::new(value),
            msb: U32Be::new(value),
        }
    }

    pub fn read(&self) -> u32 {
        self.lsb.get()
    }

    pub fn read_checked(&self) -> Result<u32, IsoError> {
        let (l, m) = (self.lsb.get(), self.msb.get());
        if l != m {
            return Err(IsoError::InvalidFormat("both-endian u32 disagreement"));
        }
        Ok(l)
    }

    pub fn write(&mut self, value: u32) {
        self.lsb.set(value);
        self.msb.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_str_padding_and_length() {
        let s = IsoStrD::<8>::from_str("ABC").unwrap();
        assert_eq!(bytemuck::bytes_of(&s), b"ABC     ");
        assert_eq!(s.len(), 3);
        assert_eq!(s.to_str(), "ABC");
        assert!(IsoStrD::<2>::from_str("ABC").is_err());
        assert!(IsoStrD::<8>::from_str("abc").is_err());
    }

    #[test]
    fn both_endian_layout_and_check() {
        let v = U32LsbMsb::new(0x00010203);
        assert_eq!(
            bytemuck::bytes_of(&v),
            &[0x03, 0x02, 0x01, 0x00, 0x00, 0x01, 0x02, 0x03]
        );
        assert_eq!(v.read_checked().unwrap(), 0x00010203);

        let bad: U32LsbMsb = *bytemuck::from_bytes(&[1, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(bad.read(), 1);
        assert!(bad.read_checked().is_err());
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_name("readme.md", false), "README.MD;1");
        assert_eq!(canonical_name("Hello World.TXT", false), "HELLOWORLD.TXT;1");
        assert_eq!(canonical_name("a.b.c", false), "AB.C;1");
        assert_eq!(canonical_name("noext", false), "NOEXT;1");
        assert_eq!(canonical_name("weird-name!", true), "WEIRD_NAME_");
        assert_eq!(canonical_name("foo", true), "FOO");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for (name, dir) in [
            ("readme.md", false),
            ("Hello World.TXT", false),
            ("x".repeat(60).as_str(), false),
            ("Deeply Nested Dir!", true),
        ] {
            let once = canonical_name(name, dir);
            let twice = canonical_name(&once, dir);
            assert_eq!(once, twice, "canonical_name not idempotent for {name:?}");
            validate_name(&once, dir).unwrap();
        }
    }

    #[test]
    fn name_validation() {
        validate_name("FOO", true).unwrap();
        validate_name("README.MD;1", false).unwrap();
        validate_name("NOEXT;1", false).unwrap();
        assert!(validate_name("foo", true).is_err());
        assert!(validate_name("README.MD", false).is_err());
        assert!(validate_name("", true).is_err());
        assert!(validate_name(&"A".repeat(31), true).is_err());
    }
}
