//! Directory records: the 33-byte fixed header, the variable identifier,
//! and the system-use area that SUSP extensions ride in.
//!
//! Records never cross a logical-block boundary. When one would, the
//! encoder zero-pads to the boundary first, so a directory's data length
//! is always a whole number of blocks.

use crate::IsoError;
use crate::datetime::RecordedAt;
use crate::types::{U16LsbMsb, U32LsbMsb};

/// Identifier byte for the "self" (`.`) record.
pub const IDENT_SELF: &[u8] = &[0x00];
/// Identifier byte for the "parent" (`..`) record.
pub const IDENT_PARENT: &[u8] = &[0x01];

pub const RECORD_HEADER_LEN: usize = 33;
/// A self or parent record: header plus one identifier byte.
pub const SELF_RECORD_LEN: usize = 34;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0b0000_0001;
        const DIRECTORY = 0b0000_0010;
        const ASSOCIATED = 0b0000_0100;
        const EXTENDED_ATTRIBUTES = 0b0000_1000;
        const EXTENDED_PERMISSIONS = 0b0001_0000;
        const MORE_ENTRIES = 0b1000_0000;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RecordHeader {
    pub len: u8,
    pub ext_attr_len: u8,
    /// Logical block of the extent.
    pub extent: U32LsbMsb,
    /// Length of the data in bytes.
    pub data_len: U32LsbMsb,
    pub recorded: RecordedAt,
    pub flags: u8,
    /// Only meaningful for interleaved files.
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub volume_seq: U16LsbMsb,
    pub ident_len: u8,
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self {
            len: 0,
            ext_attr_len: 0,
            extent: U32LsbMsb::new(0),
            data_len: U32LsbMsb::new(0),
            recorded: RecordedAt::default(),
            flags: 0,
            file_unit_size: 0,
            interleave_gap: 0,
            volume_seq: U16LsbMsb::new(1),
            ident_len: 0,
        }
    }
}

impl RecordHeader {
    pub fn is_directory(&self) -> bool {
        FileFlags::from_bits_retain(self.flags).contains(FileFlags::DIRECTORY)
    }

    pub fn is_hidden(&self) -> bool {
        FileFlags::from_bits_retain(self.flags).contains(FileFlags::HIDDEN)
    }
}

/// A full directory record: header, identifier bytes, system-use area.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub header: RecordHeader,
    pub ident: Vec<u8>,
    pub system_use: Vec<u8>,
}

impl DirectoryRecord {
    pub fn new(
        ident: &[u8],
        extent: u32,
        data_len: u32,
        flags: FileFlags,
        recorded: RecordedAt,
    ) -> Self {
        let mut record = Self {
            header: RecordHeader {
                extent: U32LsbMsb::new(extent),
                data_len: U32LsbMsb::new(data_len),
                recorded,
                flags: flags.bits(),
                ident_len: ident.len() as u8,
                ..Default::default()
            },
            ident: ident.to_vec(),
            system_use: Vec::new(),
        };
        record.header.len = record.encoded_len() as u8;
        record
    }

    /// Attaches system-use bytes, keeping the record length even.
    pub fn with_system_use(mut self, system_use: Vec<u8>) -> Self {
        debug_assert!(system_use.len() % 2 == 0, "system-use area must stay even");
        self.system_use = system_use;
        self.header.len = self.encoded_len() as u8;
        self
    }

    /// One pad byte keeps the identifier area even, so the header offset
    /// of the system-use area is too.
    fn ident_padding(&self) -> usize {
        (self.ident.len() + 1) % 2
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.ident.len() + self.ident_padding() + self.system_use.len()
    }

    pub fn is_self(&self) -> bool {
        self.ident == IDENT_SELF
    }

    pub fn is_parent(&self) -> bool {
        self.ident == IDENT_PARENT
    }

    /// The identifier as text, with the self/parent bytes spelled out.
    pub fn ident_str(&self) -> String {
        match self.ident.as_slice() {
            [0x00] => ".".to_string(),
            [0x01] => "..".to_string(),
            other => String::from_utf8_lossy(other).into_owned(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(bytemuck::bytes_of(&self.header));
        bytes.extend_from_slice(&self.ident);
        if self.ident_padding() == 1 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&self.system_use);
        bytes
    }

    /// Decodes one record from the front of `bytes`. Rejects records whose
    /// stated length does not fit the slice or their own header, and
    /// both-endian fields that disagree.
    pub fn parse(bytes: &[u8]) -> Result<Self, IsoError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(IsoError::InvalidFormat("truncated directory record"));
        }
        let header: RecordHeader = *bytemuck::from_bytes(&bytes[..RECORD_HEADER_LEN]);
        let len = header.len as usize;
        if len < RECORD_HEADER_LEN + header.ident_len as usize || len > bytes.len() {
            return Err(IsoError::InvalidFormat("directory record length"));
        }
        header.extent.read_checked()?;
        header.data_len.read_checked()?;
        header.volume_seq.read_checked()?;

        let ident_len = header.ident_len as usize;
        let ident = bytes[RECORD_HEADER_LEN..RECORD_HEADER_LEN + ident_len].to_vec();
        let padding = (ident_len + 1) % 2;
        let sys_start = RECORD_HEADER_LEN + ident_len + padding;
        let system_use = if sys_start < len {
            bytes[sys_start..len].to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            header,
            ident,
            system_use,
        })
    }
}

/// Packs records into directory data, zero-padding to the next block
/// whenever a record would straddle a boundary. The result is always a
/// whole number of blocks.
pub fn pack_records(records: &[DirectoryRecord], block_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        let len = record.encoded_len();
        let used = out.len() % block_size;
        if used + len > block_size {
            out.resize(out.len() + block_size - used, 0);
        }
        out.extend_from_slice(&record.to_bytes());
    }
    let rem = out.len() % block_size;
    if rem != 0 || out.is_empty() {
        out.resize(out.len() + block_size - rem, 0);
    }
    out
}

/// Sizes the packed form of a directory without encoding it, from the
/// lengths of the records alone.
pub fn packed_size(record_lens: impl IntoIterator<Item = usize>, block_size: usize) -> u64 {
    let mut used = 0usize;
    let mut total = 0u64;
    for len in record_lens {
        debug_assert!(len <= block_size);
        if used + len > block_size {
            total += (block_size - used) as u64;
            used = 0;
        }
        used += len;
        total += len as u64;
    }
    total.div_ceil(block_size as u64) * block_size as u64
}

/// Walks the records in one directory extent. A zero length byte marks
/// boundary padding; parsing resumes at the next block.
pub fn parse_directory(data: &[u8], block_size: usize) -> Result<Vec<DirectoryRecord>, IsoError> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if data[pos] == 0 {
            pos = (pos / block_size + 1) * block_size;
            continue;
        }
        let record = DirectoryRecord::parse(&data[pos..])?;
        pos += record.header.len as usize;
        records.push(record);
    }
    Ok(records)
}
