//! Volume descriptors: the 2048-byte records at block 16 and up that
//! describe the volume, optionally announce a boot catalog, and end with
//! the set terminator.

use std::io::{Read, Write};

use bytemuck::Zeroable;
use platter_common::num::{U32Be, U32Le};

use crate::IsoError;
use crate::datetime::DecDateTime;
use crate::types::{IsoStrA, IsoStrD, U16LsbMsb, U32LsbMsb};

pub const DESCRIPTOR_LEN: usize = 2048;
/// Logical block where the descriptor set starts.
pub const DESCRIPTOR_START_BLOCK: u64 = 16;
const STANDARD_ID: [u8; 5] = *b"CD001";

const TYPE_BOOT_RECORD: u8 = 0;
const TYPE_PRIMARY: u8 = 1;
const TYPE_SUPPLEMENTARY: u8 = 2;
const TYPE_PARTITION: u8 = 3;
const TYPE_TERMINATOR: u8 = 255;

/// Logical block sizes an image may legally use.
pub const VALID_BLOCK_SIZES: [u32; 3] = [2048, 4096, 8192];

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrimaryVolumeDescriptor {
    pub type_code: u8,
    pub standard_id: [u8; 5],
    pub version: u8,
    unused1: u8,
    pub system_id: IsoStrA<32>,
    pub volume_id: IsoStrD<32>,
    unused2: [u8; 8],
    /// Total image size in logical blocks.
    pub volume_space_size: U32LsbMsb,
    unused3: [u8; 32],
    pub volume_set_size: U16LsbMsb,
    pub volume_sequence_number: U16LsbMsb,
    pub logical_block_size: U16LsbMsb,
    pub path_table_size: U32LsbMsb,
    pub type_l_path_table: U32Le,
    pub opt_type_l_path_table: U32Le,
    pub type_m_path_table: U32Be,
    pub opt_type_m_path_table: U32Be,
    /// The root directory record, self-identified, 34 bytes.
    pub root_record: [u8; 34],
    pub volume_set_id: IsoStrD<128>,
    pub publisher_id: IsoStrA<128>,
    pub data_preparer_id: IsoStrA<128>,
    pub application_id: IsoStrA<128>,
    pub copyright_file_id: [u8; 37],
    pub abstract_file_id: [u8; 37],
    pub bibliographic_file_id: [u8; 37],
    pub creation: DecDateTime,
    pub modification: DecDateTime,
    pub expiration: DecDateTime,
    pub effective: DecDateTime,
    pub file_structure_version: u8,
    unused4: u8,
    pub application_data: [u8; 512],
    reserved: [u8; 653],
}

impl PrimaryVolumeDescriptor {
    pub fn new(volume_id: &str, block_size: u32) -> Result<Self, IsoError> {
        let now = crate::datetime::image_timestamp();
        let mut pvd = Self::zeroed();
        pvd.type_code = TYPE_PRIMARY;
        pvd.standard_id = STANDARD_ID;
        pvd.version = 1;
        pvd.system_id = IsoStrA::empty();
        pvd.volume_id = IsoStrD::from_str(volume_id)?;
        pvd.volume_set_size = U16LsbMsb::new(1);
        pvd.volume_sequence_number = U16LsbMsb::new(1);
        pvd.logical_block_size = U16LsbMsb::new(block_size as u16);
        pvd.volume_set_id = IsoStrD::empty();
        pvd.publisher_id = IsoStrA::empty();
        pvd.data_preparer_id = IsoStrA::empty();
        pvd.application_id = IsoStrA::from_str("PLATTER ISO 9660 BUILDER")?;
        pvd.copyright_file_id = [b' '; 37];
        pvd.abstract_file_id = [b' '; 37];
        pvd.bibliographic_file_id = [b' '; 37];
        pvd.creation = DecDateTime::from_datetime(now);
        pvd.modification = DecDateTime::from_datetime(now);
        pvd.expiration = DecDateTime::unset();
        pvd.effective = DecDateTime::unset();
        pvd.file_structure_version = 1;
        Ok(pvd)
    }

    pub fn block_size(&self) -> Result<u32, IsoError> {
        let size = self.logical_block_size.read_checked()? as u32;
        if !VALID_BLOCK_SIZES.contains(&size) {
            return Err(IsoError::InvalidFormat("logical block size"));
        }
        Ok(size)
    }

    fn validate(&self) -> Result<(), IsoError> {
        if self.standard_id != STANDARD_ID {
            return Err(IsoError::InvalidFormat("volume descriptor identifier"));
        }
        if self.version != 1 || self.file_structure_version != 1 {
            return Err(IsoError::InvalidFormat("volume descriptor version"));
        }
        self.volume_space_size.read_checked()?;
        self.path_table_size.read_checked()?;
        self.volume_set_size.read_checked()?;
        self.volume_sequence_number.read_checked()?;
        self.block_size()?;
        Ok(())
    }
}

impl core::fmt::Debug for PrimaryVolumeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PrimaryVolumeDescriptor")
            .field("volume_id", &self.volume_id)
            .field("volume_space_size", &self.volume_space_size.read())
            .field("logical_block_size", &self.logical_block_size.read())
            .field("path_table_size", &self.path_table_size.read())
            .field("type_l_path_table", &self.type_l_path_table.get())
            .field("type_m_path_table", &self.type_m_path_table.get())
            .finish_non_exhaustive()
    }
}

/// The El Torito boot record volume descriptor: names the specification
/// and points at the boot catalog block.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BootRecordVolumeDescriptor {
    pub type_code: u8,
    pub standard_id: [u8; 5],
    pub version: u8,
    pub boot_system_id: [u8; 32],
    pub boot_id: [u8; 32],
    pub catalog_block: U32Le,
    unused: [u8; 1973],
}

impl BootRecordVolumeDescriptor {
    pub const EL_TORITO_ID: &'static [u8] = b"EL TORITO SPECIFICATION";

    pub fn new(catalog_block: u32) -> Self {
        let mut descriptor = Self::zeroed();
        descriptor.type_code = TYPE_BOOT_RECORD;
        descriptor.standard_id = STANDARD_ID;
        descriptor.version = 1;
        descriptor.boot_system_id[..Self::EL_TORITO_ID.len()].copy_from_slice(Self::EL_TORITO_ID);
        descriptor.catalog_block = U32Le::new(catalog_block);
        descriptor
    }

    pub fn is_el_torito(&self) -> bool {
        self.boot_system_id.starts_with(Self::EL_TORITO_ID)
    }
}

impl core::fmt::Debug for BootRecordVolumeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootRecordVolumeDescriptor")
            .field("el_torito", &self.is_el_torito())
            .field("catalog_block", &self.catalog_block.get())
            .finish_non_exhaustive()
    }
}

/// A descriptor type this library stores but does not interpret.
#[derive(Clone)]
pub struct RawDescriptor {
    pub bytes: [u8; DESCRIPTOR_LEN],
}

impl core::fmt::Debug for RawDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RawDescriptor(type {})", self.bytes[0])
    }
}

#[derive(Debug, Clone)]
pub enum VolumeDescriptor {
    Primary(PrimaryVolumeDescriptor),
    BootRecord(BootRecordVolumeDescriptor),
    Supplementary(RawDescriptor),
    Partition(RawDescriptor),
}

impl VolumeDescriptor {
    fn to_bytes(&self) -> [u8; DESCRIPTOR_LEN] {
        match self {
            VolumeDescriptor::Primary(pvd) => {
                let mut out = [0u8; DESCRIPTOR_LEN];
                out.copy_from_slice(bytemuck::bytes_of(pvd));
                out
            }
            VolumeDescriptor::BootRecord(brvd) => {
                let mut out = [0u8; DESCRIPTOR_LEN];
                out.copy_from_slice(bytemuck::bytes_of(brvd));
                out
            }
            VolumeDescriptor::Supplementary(raw) | VolumeDescriptor::Partition(raw) => raw.bytes,
        }
    }
}

/// The parsed descriptor set, terminator excluded.
#[derive(Debug, Default, Clone)]
pub struct VolumeDescriptorList {
    pub descriptors: Vec<VolumeDescriptor>,
}

impl VolumeDescriptorList {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: VolumeDescriptor) {
        self.descriptors.push(descriptor);
    }

    /// Bytes the set occupies on disk, terminator included.
    pub fn size_required(&self) -> usize {
        (self.descriptors.len() + 1) * DESCRIPTOR_LEN
    }

    pub fn primary(&self) -> Result<&PrimaryVolumeDescriptor, IsoError> {
        self.descriptors
            .iter()
            .find_map(|d| match d {
                VolumeDescriptor::Primary(pvd) => Some(pvd),
                _ => None,
            })
            .ok_or(IsoError::InvalidFormat("missing primary volume descriptor"))
    }

    pub fn primary_mut(&mut self) -> Result<&mut PrimaryVolumeDescriptor, IsoError> {
        self.descriptors
            .iter_mut()
            .find_map(|d| match d {
                VolumeDescriptor::Primary(pvd) => Some(pvd),
                _ => None,
            })
            .ok_or(IsoError::InvalidFormat("missing primary volume descriptor"))
    }

    pub fn boot_record(&self) -> Option<&BootRecordVolumeDescriptor> {
        self.descriptors.iter().find_map(|d| match d {
            VolumeDescriptor::BootRecord(brvd) => Some(brvd),
            _ => None,
        })
    }

    /// Reads descriptors until the set terminator. The reader is expected
    /// to sit at the start of the descriptor area.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, IsoError> {
        let mut descriptors = Vec::new();
        loop {
            // A conforming set terminates well before this.
            if descriptors.len() > 64 {
                return Err(IsoError::InvalidFormat("unterminated volume descriptor set"));
            }
            let mut block = [0u8; DESCRIPTOR_LEN];
            reader.read_exact(&mut block)?;
            if block[1..6] != STANDARD_ID {
                return Err(IsoError::InvalidFormat("volume descriptor identifier"));
            }
            match block[0] {
                TYPE_TERMINATOR => break,
                TYPE_PRIMARY => {
                    let pvd: PrimaryVolumeDescriptor = *bytemuck::from_bytes(&block);
                    pvd.validate()?;
                    descriptors.push(VolumeDescriptor::Primary(pvd));
                }
                TYPE_BOOT_RECORD => {
                    let brvd: BootRecordVolumeDescriptor = *bytemuck::from_bytes(&block);
                    descriptors.push(VolumeDescriptor::BootRecord(brvd));
                }
                TYPE_SUPPLEMENTARY => {
                    descriptors.push(VolumeDescriptor::Supplementary(RawDescriptor {
                        bytes: block,
                    }));
                }
                TYPE_PARTITION => {
                    descriptors.push(VolumeDescriptor::Partition(RawDescriptor { bytes: block }));
                }
                _ => return Err(IsoError::InvalidFormat("volume descriptor type")),
            }
        }
        Ok(Self { descriptors })
    }

    /// Writes the set followed by the terminator.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), IsoError> {
        for descriptor in &self.descriptors {
            writer.write_all(&descriptor.to_bytes())?;
        }
        let mut terminator = [0u8; DESCRIPTOR_LEN];
        terminator[0] = TYPE_TERMINATOR;
        terminator[1..6].copy_from_slice(&STANDARD_ID);
        terminator[6] = 1;
        writer.write_all(&terminator)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_eq_size!(PrimaryVolumeDescriptor, [u8; DESCRIPTOR_LEN]);
    static_assertions::assert_eq_size!(BootRecordVolumeDescriptor, [u8; DESCRIPTOR_LEN]);
    static_assertions::assert_eq_align!(PrimaryVolumeDescriptor, u8);

    #[test]
    fn pvd_field_offsets() {
        let mut pvd = PrimaryVolumeDescriptor::new("TESTVOL", 2048).unwrap();
        pvd.volume_space_size.write(1234);
        pvd.type_l_path_table.set(19);
        pvd.type_m_path_table.set(20);
        let bytes = bytemuck::bytes_of(&pvd);

        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..6], b"CD001");
        assert_eq!(&bytes[40..47], b"TESTVOL");
        assert_eq!(u32::from_le_bytes(bytes[80..84].try_into().unwrap()), 1234);
        assert_eq!(u32::from_be_bytes(bytes[84..88].try_into().unwrap()), 1234);
        assert_eq!(u16::from_le_bytes(bytes[128..130].try_into().unwrap()), 2048);
        assert_eq!(u32::from_le_bytes(bytes[140..144].try_into().unwrap()), 19);
        assert_eq!(u32::from_be_bytes(bytes[148..152].try_into().unwrap()), 20);
        assert_eq!(bytes[881], 1);
    }

    #[test]
    fn descriptor_set_round_trip() {
        let mut list = VolumeDescriptorList::empty();
        list.push(VolumeDescriptor::Primary(
            PrimaryVolumeDescriptor::new("ROUNDTRIP", 2048).unwrap(),
        ));
        list.push(VolumeDescriptor::BootRecord(BootRecordVolumeDescriptor::new(
            40,
        )));
        assert_eq!(list.size_required(), 3 * DESCRIPTOR_LEN);

        let mut buf = Vec::new();
        list.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 3 * DESCRIPTOR_LEN);

        let parsed = VolumeDescriptorList::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.descriptors.len(), 2);
        assert_eq!(parsed.primary().unwrap().volume_id.to_str(), "ROUNDTRIP");
        let brvd = parsed.boot_record().unwrap();
        assert!(brvd.is_el_torito());
        assert_eq!(brvd.catalog_block.get(), 40);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let block = [0u8; DESCRIPTOR_LEN];
        assert!(VolumeDescriptorList::parse(&mut block.as_slice()).is_err());
    }

    #[test]
    fn both_endian_disagreement_is_rejected() {
        let mut list = VolumeDescriptorList::empty();
        list.push(VolumeDescriptor::Primary(
            PrimaryVolumeDescriptor::new("VOL", 2048).unwrap(),
        ));
        let mut buf = Vec::new();
        list.write(&mut buf).unwrap();
        // Corrupt the big-endian half of volume_space_size.
        buf[84] ^= 0x01;
        assert!(VolumeDescriptorList::parse(&mut buf.as_slice()).is_err());
    }
}
