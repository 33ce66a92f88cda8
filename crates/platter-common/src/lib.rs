//! Shared plumbing for the platter crates: the GUID codec, the CRC-32
//! flavour used by partition tables, endian-typed integers for on-disk
//! structs, and fixed-width UTF-16 name fields.

pub mod crc;
pub mod endian;
pub mod guid;
pub mod num;
pub mod utf16;

pub use self::crc::crc32;
pub use self::guid::{Guid, GuidError};
