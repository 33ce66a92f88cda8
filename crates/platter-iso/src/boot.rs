//! El Torito: the boot record volume descriptor points at a catalog of
//! 32-byte entries naming boot images already stored in the filesystem.
//! The catalog opens with a validation entry whose checksum makes the
//! whole 32-byte block sum to zero modulo 2^16.

use core::fmt::Debug;
use std::io::{Read, Write};

use platter_common::num::{U16Le, U32Le};

use crate::IsoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformId {
    /// 80x86 BIOS.
    X86,
    PowerPC,
    Macintosh,
    /// EFI firmware of any architecture.
    Efi,
    Unknown(u8),
}

impl PlatformId {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::X86,
            0x01 => Self::PowerPC,
            0x02 => Self::Macintosh,
            0xEF => Self::Efi,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::X86 => 0x00,
            Self::PowerPC => 0x01,
            Self::Macintosh => 0x02,
            Self::Efi => 0xEF,
            Self::Unknown(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationType {
    NoEmulation,
    Floppy12M,
    Floppy144M,
    Floppy288M,
    HardDisk,
    Unknown(u8),
}

impl EmulationType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::NoEmulation,
            0x01 => Self::Floppy12M,
            0x02 => Self::Floppy144M,
            0x03 => Self::Floppy288M,
            0x04 => Self::HardDisk,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoEmulation => 0x00,
            Self::Floppy12M => 0x01,
            Self::Floppy144M => 0x02,
            Self::Floppy288M => 0x03,
            Self::HardDisk => 0x04,
            Self::Unknown(value) => value,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BootValidationEntry {
    pub header_id: u8,
    pub platform_id: u8,
    reserved: [u8; 2],
    pub manufacturer: [u8; 24],
    pub checksum: U16Le,
    /// 0x55, 0xAA
    pub key: [u8; 2],
}

impl BootValidationEntry {
    pub fn new(platform: PlatformId) -> Self {
        let mut entry = Self {
            header_id: 1,
            platform_id: platform.to_u8(),
            reserved: [0; 2],
            manufacturer: [0; 24],
            checksum: U16Le::new(0),
            key: [0x55, 0xAA],
        };
        entry.checksum.set(entry.compute_checksum());
        entry
    }

    /// The two's-complement value that makes all sixteen words of the
    /// entry sum to zero.
    pub fn compute_checksum(&self) -> u16 {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(bytemuck::bytes_of(self));
        bytes[28] = 0;
        bytes[29] = 0;
        let mut sum = 0u16;
        for pair in bytes.chunks_exact(2) {
            sum = sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]));
        }
        (!sum).wrapping_add(1)
    }

    pub fn is_valid(&self) -> bool {
        self.header_id == 0x01
            && self.key == [0x55, 0xAA]
            && self.checksum.get() == self.compute_checksum()
    }
}

impl Debug for BootValidationEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootValidationEntry")
            .field("platform", &PlatformId::from_u8(self.platform_id))
            .field("checksum", &self.checksum.get())
            .finish_non_exhaustive()
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BootSectionHeaderEntry {
    /// 0x90 when more headers follow, 0x91 for the final header.
    pub header_type: u8,
    pub platform_id: u8,
    pub section_count: U16Le,
    pub section_ident: [u8; 28],
}

impl Debug for BootSectionHeaderEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootSectionHeaderEntry")
            .field("header_type", &format_args!("{:#x}", self.header_type))
            .field("platform", &PlatformId::from_u8(self.platform_id))
            .field("section_count", &self.section_count.get())
            .finish_non_exhaustive()
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BootSectionEntry {
    /// 0x88 bootable, 0x00 not bootable.
    pub boot_indicator: u8,
    pub boot_media_type: u8,
    pub load_segment: U16Le,
    pub system_type: u8,
    reserved0: u8,
    /// Virtual 512-byte sectors to load.
    pub sector_count: U16Le,
    /// Logical block of the boot image.
    pub load_rba: U32Le,
    pub selection_criteria: u8,
    pub vendor_unique: [u8; 19],
}

impl BootSectionEntry {
    pub fn new(
        emulation: EmulationType,
        load_segment: u16,
        sector_count: u16,
        load_rba: u32,
    ) -> Self {
        Self {
            boot_indicator: 0x88,
            boot_media_type: emulation.to_u8(),
            load_segment: U16Le::new(load_segment),
            system_type: 0,
            reserved0: 0,
            sector_count: U16Le::new(sector_count),
            load_rba: U32Le::new(load_rba),
            selection_criteria: 0,
            vendor_unique: [0; 19],
        }
    }

    pub fn is_bootable(&self) -> bool {
        self.boot_indicator == 0x88
    }
}

impl Debug for BootSectionEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootSectionEntry")
            .field("bootable", &self.is_bootable())
            .field("emulation", &EmulationType::from_u8(self.boot_media_type))
            .field("load_segment", &self.load_segment.get())
            .field("sector_count", &self.sector_count.get())
            .field("load_rba", &self.load_rba.get())
            .finish_non_exhaustive()
    }
}

/// The boot catalog: validation entry, default entry, then one section
/// header and entry per additional platform.
#[derive(Debug, Clone)]
pub struct BootCatalog {
    pub validation: BootValidationEntry,
    pub default_entry: BootSectionEntry,
    pub sections: Vec<(BootSectionHeaderEntry, Vec<BootSectionEntry>)>,
}

impl BootCatalog {
    pub fn new(platform: PlatformId, default_entry: BootSectionEntry) -> Self {
        Self {
            validation: BootValidationEntry::new(platform),
            default_entry,
            sections: Vec::new(),
        }
    }

    pub fn add_section(&mut self, platform: PlatformId, entries: Vec<BootSectionEntry>) {
        if let Some((header, _)) = self.sections.last_mut() {
            // No longer the final header.
            header.header_type = 0x90;
        }
        let header = BootSectionHeaderEntry {
            header_type: 0x91,
            platform_id: platform.to_u8(),
            section_count: U16Le::new(entries.len() as u16),
            section_ident: [0; 28],
        };
        self.sections.push((header, entries));
    }

    /// Every boot entry in catalog order, default first.
    pub fn entries(&self) -> Vec<&BootSectionEntry> {
        let mut out = vec![&self.default_entry];
        for (_, entries) in &self.sections {
            out.extend(entries.iter());
        }
        out
    }

    pub fn size(&self) -> usize {
        64 + self
            .sections
            .iter()
            .map(|(_, entries)| (entries.len() + 1) * 32)
            .sum::<usize>()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), IsoError> {
        writer.write_all(bytemuck::bytes_of(&self.validation))?;
        writer.write_all(bytemuck::bytes_of(&self.default_entry))?;
        for (header, entries) in &self.sections {
            writer.write_all(bytemuck::bytes_of(header))?;
            for entry in entries {
                writer.write_all(bytemuck::bytes_of(entry))?;
            }
        }
        writer.write_all(&[0u8; 32])?;
        Ok(())
    }

    /// Parses a catalog from the reader, positioned at its first byte.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, IsoError> {
        let mut block = [0u8; 32];
        reader.read_exact(&mut block)?;
        let validation: BootValidationEntry = bytemuck::cast(block);
        if !validation.is_valid() {
            return Err(IsoError::ChecksumMismatch("boot catalog validation entry"));
        }
        reader.read_exact(&mut block)?;
        let default_entry: BootSectionEntry = bytemuck::cast(block);
        if !default_entry.is_bootable() {
            return Err(IsoError::InvalidFormat("boot catalog default entry"));
        }

        let mut sections: Vec<(BootSectionHeaderEntry, Vec<BootSectionEntry>)> = Vec::new();
        loop {
            reader.read_exact(&mut block)?;
            match block[0] {
                0x00 => break,
                0x90 | 0x91 => {
                    let header: BootSectionHeaderEntry = bytemuck::cast(block);
                    sections.push((header, Vec::new()));
                }
                0x88 => {
                    let entry: BootSectionEntry = bytemuck::cast(block);
                    match sections.last_mut() {
                        Some((_, entries)) => entries.push(entry),
                        None => return Err(IsoError::InvalidFormat("boot entry before header")),
                    }
                }
                _ => return Err(IsoError::InvalidFormat("boot catalog entry type")),
            }
        }
        Ok(Self {
            validation,
            default_entry,
            sections,
        })
    }
}

/// The boot information table some loaders expect patched into the boot
/// image at offset 8.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BootInfoTable {
    /// Block of the primary volume descriptor.
    pub pvd_block: U32Le,
    /// Block of the boot image itself.
    pub file_block: U32Le,
    pub file_len: U32Le,
    /// Additive 32-bit checksum of the image past byte 64.
    pub checksum: U32Le,
}

/// Options for one bootable image in the catalog.
#[derive(Debug, Clone)]
pub struct BootEntryOptions {
    pub platform: PlatformId,
    /// Absolute path of the boot image inside the staged tree.
    pub boot_file: String,
    pub emulation: EmulationType,
    pub load_segment: u16,
    /// Virtual 512-byte sectors to load; 0 derives it from the file size.
    pub load_size: u16,
    /// Omit the boot file from directory listings.
    pub hide: bool,
    /// Patch a [`BootInfoTable`] into the image after placement.
    pub boot_info_table: bool,
}

impl Default for BootEntryOptions {
    fn default() -> Self {
        Self {
            platform: PlatformId::X86,
            boot_file: String::new(),
            emulation: EmulationType::NoEmulation,
            load_segment: 0,
            load_size: 0,
            hide: false,
            boot_info_table: false,
        }
    }
}

/// El Torito options for a finalize run. The first entry becomes the
/// catalog's default entry; the rest get section headers of their own.
#[derive(Debug, Clone)]
pub struct ElToritoOptions {
    /// Platform advertised by the validation entry.
    pub platform: PlatformId,
    pub entries: Vec<BootEntryOptions>,
}

impl ElToritoOptions {
    pub fn single(platform: PlatformId, boot_file: &str) -> Self {
        Self {
            platform,
            entries: vec![BootEntryOptions {
                platform,
                boot_file: boot_file.to_string(),
                ..Default::default()
            }],
        }
    }
}
