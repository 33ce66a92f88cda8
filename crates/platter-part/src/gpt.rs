//! The GUID Partition Table.
//!
//! A GPT disk carries two copies of the table: the primary header at LBA 1
//! with its entry array right behind it, and a secondary header in the
//! very last sector with its entry array immediately before it. Both
//! header and entry array are CRC-protected, and the pair cross-reference
//! each other through the `my_lba`/`alternate_lba` fields.

use std::io::{Read, Write};

use platter_common::crc::crc32;
use platter_common::guid::Guid;
use platter_common::num::{U32Le, U64Le};
use platter_common::utf16::FixedUtf16Str;
use platter_io::{BlockDevice, SectorSize};

use crate::PartError;
use crate::mbr::{self, Chs};

const SIGNATURE: [u8; 8] = *b"EFI PART";
const REVISION: u32 = 0x0001_0000;
const HEADER_SIZE: u32 = 92;
/// Conventional geometry: 128 entries of 128 bytes.
const ENTRY_COUNT: u32 = 128;
const ENTRY_SIZE: u32 = 128;
const ENTRY_ARRAY_BYTES: u64 = (ENTRY_COUNT * ENTRY_SIZE) as u64;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RawHeader {
    signature: [u8; 8],
    revision: U32Le,
    header_size: U32Le,
    header_crc32: U32Le,
    reserved: U32Le,
    my_lba: U64Le,
    alternate_lba: U64Le,
    first_usable_lba: U64Le,
    last_usable_lba: U64Le,
    disk_guid: Guid,
    partition_entry_lba: U64Le,
    num_partition_entries: U32Le,
    size_of_partition_entry: U32Le,
    partition_entry_array_crc32: U32Le,
}

impl RawHeader {
    /// CRC over the 92 header bytes with the CRC field itself zeroed.
    fn compute_crc(&self) -> u32 {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes.copy_from_slice(bytemuck::bytes_of(self));
        bytes[16..20].fill(0);
        crc32(&bytes)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct RawEntry {
    type_guid: Guid,
    unique_guid: Guid,
    first_lba: U64Le,
    last_lba: U64Le,
    attributes: U64Le,
    name: FixedUtf16Str<36>,
}

bitflags::bitflags! {
    /// GPT partition attribute flags.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct GptAttributes: u64 {
        /// Required by the platform; do not touch.
        const PLATFORM_REQUIRED = 1 << 0;
        /// Firmware should not produce a block IO protocol for this partition.
        const NO_BLOCK_IO = 1 << 1;
        /// Bootable in legacy BIOS terms.
        const LEGACY_BIOS_BOOTABLE = 1 << 2;
    }
}

/// One slot in the entry array. A slot with an all-zero type GUID is
/// unused but stays in place so partition numbers remain stable.
#[derive(Debug, Clone, PartialEq)]
pub struct GptPartition {
    pub type_guid: Guid,
    pub unique_guid: Guid,
    /// First sector of the partition.
    pub first_lba: u64,
    /// Last sector of the partition, inclusive.
    pub last_lba: u64,
    pub attributes: GptAttributes,
    pub name: String,
    sector_size: u64,
}

impl GptPartition {
    pub fn new(type_guid: Guid, first_lba: u64, last_lba: u64, name: &str) -> Self {
        Self {
            type_guid,
            unique_guid: Guid::generate(),
            first_lba,
            last_lba,
            attributes: GptAttributes::empty(),
            name: name.to_string(),
            sector_size: 512,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.type_guid.is_zero()
    }

    /// Capacity in bytes, from the inclusive sector range.
    pub fn size_bytes(&self) -> u64 {
        (self.last_lba - self.first_lba + 1) * self.sector_size
    }

    fn unused(sector_size: u64) -> Self {
        Self {
            type_guid: Guid::ZERO,
            unique_guid: Guid::ZERO,
            first_lba: 0,
            last_lba: 0,
            attributes: GptAttributes::empty(),
            name: String::new(),
            sector_size,
        }
    }

    fn from_raw(raw: &RawEntry, sector_size: u64) -> Self {
        Self {
            type_guid: raw.type_guid,
            unique_guid: raw.unique_guid,
            first_lba: raw.first_lba.get(),
            last_lba: raw.last_lba.get(),
            attributes: GptAttributes::from_bits_retain(raw.attributes.get()),
            name: raw.name.to_string_lossy(),
            sector_size,
        }
    }

    fn to_raw(&self) -> RawEntry {
        RawEntry {
            type_guid: self.type_guid,
            unique_guid: self.unique_guid,
            first_lba: U64Le::new(self.first_lba),
            last_lba: U64Le::new(self.last_lba),
            attributes: U64Le::new(self.attributes.bits()),
            name: FixedUtf16Str::from_str(&self.name),
        }
    }
}

/// An in-memory GPT: geometry, disk GUID and the full 128-slot array.
#[derive(Debug, Clone, PartialEq)]
pub struct GptTable {
    logical_sector_size: SectorSize,
    physical_sector_size: SectorSize,
    primary_header_lba: u64,
    secondary_header_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    pub disk_guid: Guid,
    /// Emit a protective MBR on write. Parsing always sets this; readers
    /// do not demand that one be present on disk.
    pub protective_mbr: bool,
    partitions: Vec<GptPartition>,
}

impl GptTable {
    /// Sectors covered by one copy of the entry array.
    fn entry_array_sectors(sector_size: SectorSize) -> u64 {
        ENTRY_ARRAY_BYTES / sector_size.bytes()
    }

    /// Lays out a fresh, empty table for a disk of `disk_size` bytes.
    pub fn create(disk_size: u64, sector_size: SectorSize) -> Result<Self, PartError> {
        let ss = sector_size.bytes();
        let total_sectors = disk_size / ss;
        let span = Self::entry_array_sectors(sector_size);
        // Protective MBR, two headers, two entry arrays, and at least one
        // data sector have to fit.
        if total_sectors < 2 * span + 3 {
            return Err(PartError::InvalidArgument(format!(
                "disk of {disk_size} bytes is too small for a partition table"
            )));
        }
        let secondary = total_sectors - 1;
        Ok(Self {
            logical_sector_size: sector_size,
            physical_sector_size: sector_size,
            primary_header_lba: 1,
            secondary_header_lba: secondary,
            first_usable_lba: 2 + span,
            last_usable_lba: secondary - 1 - span,
            disk_guid: Guid::generate(),
            protective_mbr: true,
            partitions: vec![GptPartition::unused(ss); ENTRY_COUNT as usize],
        })
    }

    pub fn sector_size(&self) -> SectorSize {
        self.logical_sector_size
    }

    pub fn first_usable_sector(&self) -> u64 {
        self.first_usable_lba
    }

    pub fn last_usable_sector(&self) -> u64 {
        self.last_usable_lba
    }

    pub fn secondary_header_sector(&self) -> u64 {
        self.secondary_header_lba
    }

    /// Total disk size implied by the table geometry.
    pub fn total_size(&self) -> u64 {
        (self.secondary_header_lba + 1) * self.logical_sector_size.bytes()
    }

    pub fn partitions(&self) -> &[GptPartition] {
        &self.partitions
    }

    /// Places `partition` in the first unused slot, returning its index.
    pub fn add_partition(&mut self, mut partition: GptPartition) -> Result<usize, PartError> {
        if partition.last_lba < partition.first_lba {
            return Err(PartError::InvalidArgument(
                "partition end precedes its start".to_string(),
            ));
        }
        if partition.first_lba < self.first_usable_lba || partition.last_lba > self.last_usable_lba
        {
            return Err(PartError::PartitionOverflow);
        }
        let index = self
            .partitions
            .iter()
            .position(|p| p.is_unused())
            .ok_or_else(|| {
                PartError::InvalidArgument("all partition slots are in use".to_string())
            })?;
        partition.sector_size = self.logical_sector_size.bytes();
        self.partitions[index] = partition;
        Ok(index)
    }

    /// Grows partition `index` by `sectors` logical sectors. Fails if the
    /// new end would reach the next used partition or the usable limit.
    pub fn expand_partition(&mut self, index: usize, sectors: u64) -> Result<(), PartError> {
        let part = self
            .partitions
            .get(index)
            .filter(|p| !p.is_unused())
            .ok_or_else(|| PartError::NotFound(format!("partition {index}")))?;
        let new_end = part.last_lba + sectors;
        if new_end > self.last_usable_lba {
            return Err(PartError::PartitionOverflow);
        }
        let next_start = self
            .partitions
            .iter()
            .filter(|p| !p.is_unused() && p.first_lba > part.last_lba)
            .map(|p| p.first_lba)
            .min();
        if let Some(next) = next_start {
            if new_end >= next {
                return Err(PartError::PartitionOverflow);
            }
        }
        self.partitions[index].last_lba = new_end;
        Ok(())
    }

    /// Parses and validates the primary copy of the table.
    pub fn read<B: BlockDevice>(
        device: &mut B,
        sector_size: SectorSize,
    ) -> Result<Self, PartError> {
        let ss = sector_size.bytes();
        let header = Self::read_header(device, sector_size, 1)?;

        let entry_lba = header.partition_entry_lba.get();
        let count = header.num_partition_entries.get();
        let size = header.size_of_partition_entry.get();
        if size != ENTRY_SIZE || count == 0 || count > 1024 {
            return Err(PartError::InvalidFormat("GPT partition entry geometry"));
        }
        let raw_entries = Self::read_entries(
            device,
            entry_lba * ss,
            count,
            header.partition_entry_array_crc32.get(),
        )?;

        let mut partitions: Vec<GptPartition> = raw_entries
            .iter()
            .map(|raw| GptPartition::from_raw(raw, ss))
            .collect();
        partitions.resize(ENTRY_COUNT as usize, GptPartition::unused(ss));

        Ok(Self {
            logical_sector_size: sector_size,
            physical_sector_size: sector_size,
            primary_header_lba: header.my_lba.get(),
            secondary_header_lba: header.alternate_lba.get(),
            first_usable_lba: header.first_usable_lba.get(),
            last_usable_lba: header.last_usable_lba.get(),
            disk_guid: header.disk_guid,
            protective_mbr: true,
            partitions,
        })
    }

    fn read_header<B: BlockDevice>(
        device: &mut B,
        sector_size: SectorSize,
        lba: u64,
    ) -> Result<RawHeader, PartError> {
        let mut sector = vec![0u8; sector_size.bytes() as usize];
        device.read_exact_at(&mut sector, lba * sector_size.bytes())?;
        let header: RawHeader = *bytemuck::from_bytes(&sector[..HEADER_SIZE as usize]);

        if header.signature != SIGNATURE {
            return Err(PartError::InvalidFormat("GPT signature"));
        }
        if header.revision.get() != REVISION {
            return Err(PartError::InvalidFormat("GPT revision"));
        }
        if header.header_size.get() != HEADER_SIZE {
            return Err(PartError::InvalidFormat("GPT header size"));
        }
        if header.reserved.get() != 0 {
            return Err(PartError::InvalidFormat("GPT reserved field"));
        }
        let computed = header.compute_crc();
        let stored = header.header_crc32.get();
        if stored != computed {
            return Err(PartError::ChecksumMismatch {
                field: "GPT header",
                stored,
                computed,
            });
        }
        Ok(header)
    }

    fn read_entries<B: BlockDevice>(
        device: &mut B,
        offset: u64,
        count: u32,
        stored_crc: u32,
    ) -> Result<Vec<RawEntry>, PartError> {
        let mut bytes = vec![0u8; (count * ENTRY_SIZE) as usize];
        device.read_exact_at(&mut bytes, offset)?;
        let computed = crc32(&bytes);
        if stored_crc != computed {
            return Err(PartError::ChecksumMismatch {
                field: "GPT entry array",
                stored: stored_crc,
                computed,
            });
        }
        Ok(bytemuck::cast_slice::<u8, RawEntry>(&bytes).to_vec())
    }

    fn entry_array_bytes(&self) -> Vec<u8> {
        let raw: Vec<RawEntry> = self.partitions.iter().map(|p| p.to_raw()).collect();
        bytemuck::cast_slice(&raw).to_vec()
    }

    fn build_header(&self, primary: bool, entry_crc: u32) -> RawHeader {
        let span = Self::entry_array_sectors(self.logical_sector_size);
        let (my_lba, alternate_lba, entry_lba) = if primary {
            (self.primary_header_lba, self.secondary_header_lba, 2)
        } else {
            (
                self.secondary_header_lba,
                self.primary_header_lba,
                self.secondary_header_lba - span,
            )
        };
        let mut header = RawHeader {
            signature: SIGNATURE,
            revision: U32Le::new(REVISION),
            header_size: U32Le::new(HEADER_SIZE),
            header_crc32: U32Le::new(0),
            reserved: U32Le::new(0),
            my_lba: U64Le::new(my_lba),
            alternate_lba: U64Le::new(alternate_lba),
            first_usable_lba: U64Le::new(self.first_usable_lba),
            last_usable_lba: U64Le::new(self.last_usable_lba),
            disk_guid: self.disk_guid,
            partition_entry_lba: U64Le::new(entry_lba),
            num_partition_entries: U32Le::new(ENTRY_COUNT),
            size_of_partition_entry: U32Le::new(ENTRY_SIZE),
            partition_entry_array_crc32: U32Le::new(entry_crc),
        };
        header.header_crc32.set(header.compute_crc());
        header
    }

    fn write_header<B: BlockDevice>(
        &self,
        device: &mut B,
        header: &RawHeader,
        lba: u64,
    ) -> Result<(), PartError> {
        let ss = self.logical_sector_size.bytes() as usize;
        let mut sector = vec![0u8; ss];
        sector[..HEADER_SIZE as usize].copy_from_slice(bytemuck::bytes_of(header));
        device.write_all_at(&sector, lba * self.logical_sector_size.bytes())?;
        Ok(())
    }

    /// Writes the protective MBR, both headers and both entry arrays.
    pub fn write_to<B: BlockDevice>(&self, device: &mut B) -> Result<(), PartError> {
        if device.is_read_only() {
            return Err(PartError::ReadOnly);
        }
        let ss = self.logical_sector_size.bytes();
        let span = Self::entry_array_sectors(self.logical_sector_size);

        if self.protective_mbr {
            let total_sectors = self.secondary_header_lba + 1;
            let sectors = u32::try_from(total_sectors - 1).unwrap_or(u32::MAX);
            let mut sector0 = [0u8; 512];
            sector0[446] = 0x00;
            sector0[447..450].copy_from_slice(&Chs::from_lba(1).to_bytes());
            sector0[450] = mbr::PROTECTIVE_TYPE;
            sector0[451..454].copy_from_slice(&Chs::from_lba(sectors).to_bytes());
            sector0[454..458].copy_from_slice(&1u32.to_le_bytes());
            sector0[458..462].copy_from_slice(&sectors.to_le_bytes());
            sector0[510] = 0x55;
            sector0[511] = 0xAA;
            device.write_all_at(&sector0, 0)?;
        }

        let entries = self.entry_array_bytes();
        let entry_crc = crc32(&entries);

        log::debug!(
            "writing GPT: headers at {} and {}, usable {}..{}",
            self.primary_header_lba,
            self.secondary_header_lba,
            self.first_usable_lba,
            self.last_usable_lba
        );
        let primary = self.build_header(true, entry_crc);
        self.write_header(device, &primary, self.primary_header_lba)?;
        device.write_all_at(&entries, 2 * ss)?;
        device.write_all_at(&entries, (self.secondary_header_lba - span) * ss)?;
        let secondary = self.build_header(false, entry_crc);
        self.write_header(device, &secondary, self.secondary_header_lba)?;
        Ok(())
    }

    /// Checks all four CRCs and that the two headers cross-reference each
    /// other correctly.
    pub fn verify<B: BlockDevice>(&self, device: &mut B) -> Result<(), PartError> {
        let ss = self.logical_sector_size.bytes();
        let primary = Self::read_header(device, self.logical_sector_size, 1)?;
        Self::read_entries(
            device,
            primary.partition_entry_lba.get() * ss,
            primary.num_partition_entries.get(),
            primary.partition_entry_array_crc32.get(),
        )?;

        let secondary =
            Self::read_header(device, self.logical_sector_size, primary.alternate_lba.get())?;
        Self::read_entries(
            device,
            secondary.partition_entry_lba.get() * ss,
            secondary.num_partition_entries.get(),
            secondary.partition_entry_array_crc32.get(),
        )?;

        if primary.alternate_lba.get() != secondary.my_lba.get()
            || primary.my_lba.get() != secondary.alternate_lba.get()
        {
            return Err(PartError::InvalidFormat("GPT header cross-reference"));
        }
        Ok(())
    }

    /// Re-derives the secondary location and usable range from the current
    /// disk size. CRCs are recomputed on the next write.
    pub fn repair(&mut self, disk_size: u64) {
        let ss = self.logical_sector_size.bytes();
        let span = Self::entry_array_sectors(self.logical_sector_size);
        let total_sectors = disk_size / ss;
        self.secondary_header_lba = total_sectors - 1;
        self.last_usable_lba = total_sectors - 2 - span;
    }

    /// Adapts the table to a new disk size. Fails with
    /// [`PartError::PartitionOverflow`] if an existing partition would end
    /// past the new last-usable sector; no fields change on failure.
    pub fn resize(&mut self, new_size: u64) -> Result<(), PartError> {
        let ss = self.logical_sector_size.bytes();
        let span = Self::entry_array_sectors(self.logical_sector_size);
        let total_sectors = new_size / ss;
        if total_sectors < 2 * span + 3 {
            return Err(PartError::InvalidArgument(format!(
                "disk of {new_size} bytes is too small for a partition table"
            )));
        }
        let last_usable = total_sectors - 2 - span;
        for part in self.partitions.iter().filter(|p| !p.is_unused()) {
            if part.last_lba > last_usable {
                return Err(PartError::PartitionOverflow);
            }
        }
        self.secondary_header_lba = total_sectors - 1;
        self.last_usable_lba = last_usable;
        Ok(())
    }

    /// Streams `reader` into partition `index`. On overflow the partition
    /// is filled to its boundary and the bytes written so far are reported
    /// through [`PartError::PartitionFull`].
    pub fn write_contents<B: BlockDevice, R: Read>(
        &self,
        device: &mut B,
        index: usize,
        reader: &mut R,
    ) -> Result<u64, PartError> {
        let part = self
            .partitions
            .get(index)
            .filter(|p| !p.is_unused())
            .ok_or_else(|| PartError::NotFound(format!("partition {index}")))?;
        let ss = self.logical_sector_size.bytes();
        let capacity = part.size_bytes();
        let base = part.first_lba * ss;

        let mut written: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                return Ok(written);
            }
            let room = capacity - written;
            let fits = (n as u64).min(room) as usize;
            device.write_all_at(&buf[..fits], base + written)?;
            written += fits as u64;
            if (fits as u64) < n as u64 {
                return Err(PartError::PartitionFull(written));
            }
        }
    }

    /// Streams the whole partition range into `writer`.
    pub fn read_contents<B: BlockDevice, W: Write>(
        &self,
        device: &mut B,
        index: usize,
        writer: &mut W,
    ) -> Result<u64, PartError> {
        let part = self
            .partitions
            .get(index)
            .filter(|p| !p.is_unused())
            .ok_or_else(|| PartError::NotFound(format!("partition {index}")))?;
        let ss = self.logical_sector_size.bytes();
        let base = part.first_lba * ss;
        let capacity = part.size_bytes();

        let mut read: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        while read < capacity {
            let chunk = (capacity - read).min(buf.len() as u64) as usize;
            device.read_exact_at(&mut buf[..chunk], base + read)?;
            writer.write_all(&buf[..chunk])?;
            read += chunk as u64;
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_eq_size!(RawHeader, [u8; 92]);
    static_assertions::assert_eq_size!(RawEntry, [u8; 128]);
    static_assertions::assert_eq_align!(RawHeader, u8);

    #[test]
    fn create_geometry_512() {
        let table = GptTable::create(10 * 1024 * 1024, SectorSize::S512).unwrap();
        assert_eq!(table.first_usable_sector(), 34);
        assert_eq!(table.last_usable_sector(), 20446);
        assert_eq!(table.secondary_header_sector(), 20479);
        assert_eq!(table.partitions().len(), 128);
        assert!(table.partitions().iter().all(|p| p.is_unused()));
    }

    #[test]
    fn create_geometry_4096() {
        let table = GptTable::create(64 * 1024 * 1024, SectorSize::S4096).unwrap();
        // The entry array spans four 4096-byte sectors.
        assert_eq!(table.first_usable_sector(), 6);
        assert_eq!(table.secondary_header_sector(), 16383);
        assert_eq!(table.last_usable_sector(), 16383 - 1 - 4);
    }

    #[test]
    fn header_crc_covers_zeroed_field() {
        let table = GptTable::create(10 * 1024 * 1024, SectorSize::S512).unwrap();
        let header = table.build_header(true, 0);
        assert_eq!(header.header_crc32.get(), header.compute_crc());
    }

    #[test]
    fn too_small_disk_is_rejected() {
        assert!(matches!(
            GptTable::create(16 * 1024, SectorSize::S512),
            Err(PartError::InvalidArgument(_))
        ));
    }
}
