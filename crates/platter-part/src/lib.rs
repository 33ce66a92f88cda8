//! Partition tables for disk images.
//!
//! Two schemes are implemented: [`gpt`] (primary + secondary headers with
//! CRC-protected entry arrays) and [`mbr`] (the legacy four-slot table).
//! Both operate on a [`platter_io::BlockDevice`] by absolute byte offset.

use platter_io::{BlockDevice, SectorSize};

pub mod gpt;
pub mod mbr;

pub use gpt::{GptAttributes, GptPartition, GptTable};
pub use mbr::{Chs, MbrPartition, MbrPartitionType, MbrTable};

/// Errors shared by the partition-table codecs.
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid {0}")]
    InvalidFormat(&'static str),

    #[error("checksum mismatch in {field}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        field: &'static str,
        stored: u32,
        computed: u32,
    },

    #[error("partition ends past the last usable sector")]
    PartitionOverflow,

    #[error("contents exceed partition capacity, wrote {0} bytes")]
    PartitionFull(u64),

    #[error("partition not found: {0}")]
    NotFound(String),

    #[error("device is read-only")]
    ReadOnly,
}

/// A partition table of either scheme.
#[derive(Debug, Clone, PartialEq)]
pub enum Table {
    Gpt(GptTable),
    Mbr(MbrTable),
}

impl Table {
    pub fn kind(&self) -> &'static str {
        match self {
            Table::Gpt(_) => "gpt",
            Table::Mbr(_) => "mbr",
        }
    }

    pub fn write_to<B: BlockDevice>(&self, device: &mut B) -> Result<(), PartError> {
        match self {
            Table::Gpt(t) => t.write_to(device),
            Table::Mbr(t) => t.write_to(device),
        }
    }
}

/// Probes a device for a partition table. A valid GPT header at LBA 1 wins
/// over the protective (or bare) MBR in sector 0; a bare MBR is reported
/// as such; a device with neither yields `None`.
pub fn read_table<B: BlockDevice>(
    device: &mut B,
    sector_size: SectorSize,
) -> Result<Option<Table>, PartError> {
    match GptTable::read(device, sector_size) {
        Ok(table) => return Ok(Some(Table::Gpt(table))),
        Err(PartError::InvalidFormat(_)) => {}
        Err(e) => return Err(e),
    }
    match MbrTable::read(device) {
        Ok(table) => Ok(Some(Table::Mbr(table))),
        Err(PartError::InvalidFormat(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
