//! Reading finished images: descriptor parsing, path-table-first
//! directory lookup with a recursive fallback, and the SUSP/Rock Ridge
//! subset (long names, POSIX modes, symlinks, relocated directories).

use chrono::{DateTime, Utc};
use std::io::{Read, Seek, SeekFrom};

use platter_common::endian::EndianType;

use crate::IsoError;
use crate::path_table::PathTable;
use crate::record::{DirectoryRecord, parse_directory};
use crate::susp::{RockRidgeInfo, SuspEntry, parse_system_use};
use crate::types::canonical_name;
use crate::volume::{
    PrimaryVolumeDescriptor, VALID_BLOCK_SIZES, VolumeDescriptorList,
};

#[cfg(feature = "el-torito")]
use crate::boot::BootCatalog;

/// One listed directory entry, after Rock Ridge processing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// The presented name: the Rock Ridge alternate name when present,
    /// otherwise the identifier without its version suffix.
    pub name: String,
    /// The raw on-disk identifier.
    pub short_name: String,
    pub is_dir: bool,
    pub size: u64,
    pub extent: u32,
    pub mode: Option<u32>,
    pub nlink: Option<u32>,
    pub symlink: Option<String>,
    pub recorded: Option<DateTime<Utc>>,
    pub hidden: bool,
    relocated: bool,
}

/// A parsed image over any seekable reader.
#[derive(Debug)]
pub struct IsoImage<'a, R: Read + Seek> {
    data: &'a mut R,
    descriptors: VolumeDescriptorList,
    block_size: u64,
    root_extent: u32,
    root_size: u32,
    path_table: PathTable,
    susp_skip: Option<u8>,
}

impl<'a, R: Read + Seek> IsoImage<'a, R> {
    pub fn parse(data: &'a mut R) -> Result<Self, IsoError> {
        let (descriptors, block_size) = Self::probe_descriptors(data)?;
        let pvd = descriptors.primary()?;

        let root = DirectoryRecord::parse(&pvd.root_record)?;
        let root_extent = root.header.extent.read();
        let root_size = root.header.data_len.read();

        let table_size = pvd.path_table_size.read() as usize;
        let table_block = pvd.type_l_path_table.get() as u64;
        let mut table_bytes = vec![0u8; table_size];
        data.seek(SeekFrom::Start(table_block * block_size))?;
        data.read_exact(&mut table_bytes)?;
        let path_table = PathTable::parse(&table_bytes, EndianType::LittleEndian)?;

        let mut image = Self {
            data,
            descriptors,
            block_size,
            root_extent,
            root_size,
            path_table,
            susp_skip: None,
        };
        image.susp_skip = image.detect_susp()?;
        Ok(image)
    }

    /// Finds the descriptor set: block 16 of whatever logical block size
    /// the image was built with.
    fn probe_descriptors(data: &mut R) -> Result<(VolumeDescriptorList, u64), IsoError> {
        for candidate in VALID_BLOCK_SIZES {
            let offset = 16 * candidate as u64;
            data.seek(SeekFrom::Start(offset))?;
            let mut magic = [0u8; 6];
            if data.read_exact(&mut magic).is_err() {
                continue;
            }
            if &magic[1..6] != b"CD001" {
                continue;
            }
            data.seek(SeekFrom::Start(offset))?;
            let descriptors = VolumeDescriptorList::parse(data)?;
            let block_size = descriptors.primary()?.block_size()? as u64;
            if block_size != candidate as u64 {
                return Err(IsoError::InvalidFormat("descriptor location"));
            }
            return Ok((descriptors, block_size));
        }
        Err(IsoError::InvalidFormat("volume descriptor set"))
    }

    /// SUSP is on when the root self record opens with an `SP` entry.
    fn detect_susp(&mut self) -> Result<Option<u8>, IsoError> {
        let records = self.read_directory_raw(self.root_extent, self.root_size)?;
        let Some(root_self) = records.iter().find(|r| r.is_self()) else {
            return Ok(None);
        };
        match parse_system_use(&root_self.system_use) {
            Ok(entries) => Ok(entries.iter().find_map(|e| match e {
                SuspEntry::Sp { skip } => Some(*skip),
                _ => None,
            })),
            // A non-SUSP system-use area is free-form; ignore it.
            Err(_) => Ok(None),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn primary(&self) -> Result<&PrimaryVolumeDescriptor, IsoError> {
        self.descriptors.primary()
    }

    /// The volume label from the primary descriptor.
    pub fn label(&self) -> String {
        self.descriptors
            .primary()
            .map(|pvd| pvd.volume_id.to_str().to_string())
            .unwrap_or_default()
    }

    pub fn has_rock_ridge(&self) -> bool {
        self.susp_skip.is_some()
    }

    pub fn read_blocks(&mut self, block: u32, len: usize) -> Result<Vec<u8>, IsoError> {
        let mut bytes = vec![0u8; len];
        self.data
            .seek(SeekFrom::Start(block as u64 * self.block_size))?;
        self.data.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_directory_raw(
        &mut self,
        extent: u32,
        size: u32,
    ) -> Result<Vec<DirectoryRecord>, IsoError> {
        let data = self.read_blocks(extent, size as usize)?;
        parse_directory(&data, self.block_size as usize)
    }

    /// Reads one self record to learn a directory's extent length.
    fn directory_size_at(&mut self, extent: u32) -> Result<u32, IsoError> {
        let block = self.read_blocks(extent, self.block_size as usize)?;
        let record = DirectoryRecord::parse(&block)?;
        if !record.header.is_directory() || !record.is_self() {
            return Err(IsoError::InvalidFormat("directory self record"));
        }
        Ok(record.header.data_len.read())
    }

    fn entry_from_record(&mut self, record: &DirectoryRecord) -> Result<DirEntry, IsoError> {
        let mut info = RockRidgeInfo::default();
        if let Some(skip) = self.susp_skip {
            let area = record.system_use.get(skip as usize..).unwrap_or(&[]);
            let mut name_buf = Vec::new();
            let mut name_done = false;
            let mut entries = parse_system_use(area)?;
            let mut hops = 0;
            loop {
                info.continuation = None;
                info.absorb(&entries, &mut name_buf, &mut name_done);
                let Some((block, offset, length)) = info.continuation else {
                    break;
                };
                hops += 1;
                if hops > 8 {
                    return Err(IsoError::InvalidFormat("continuation area chain"));
                }
                let base = block as u64 * self.block_size + offset as u64;
                let mut bytes = vec![0u8; length as usize];
                self.data.seek(SeekFrom::Start(base))?;
                self.data.read_exact(&mut bytes)?;
                entries = parse_system_use(&bytes)?;
            }
        }

        let short_name = record.ident_str();
        let mut is_dir = record.header.is_directory();
        let mut extent = record.header.extent.read();
        let mut size = record.header.data_len.read() as u64;

        // A child link means the directory content lives elsewhere.
        if let Some(block) = info.child_link {
            is_dir = true;
            extent = block;
            size = self.directory_size_at(block)? as u64;
        }

        let name = match &info.name {
            Some(name) => name.clone(),
            None => {
                if is_dir {
                    short_name.clone()
                } else {
                    short_name
                        .split_once(';')
                        .map(|(base, _)| base.to_string())
                        .unwrap_or_else(|| short_name.clone())
                }
            }
        };

        Ok(DirEntry {
            name,
            short_name,
            is_dir,
            size,
            extent,
            mode: info.mode,
            nlink: info.nlink,
            symlink: info.symlink,
            recorded: record.header.recorded.to_datetime(),
            hidden: record.header.is_hidden(),
            relocated: info.relocated,
        })
    }

    fn entries_at(&mut self, extent: u32, size: u32) -> Result<Vec<DirEntry>, IsoError> {
        let records = self.read_directory_raw(extent, size)?;
        let mut entries = Vec::new();
        for record in records
            .iter()
            .filter(|r| !r.is_self() && !r.is_parent())
        {
            entries.push(self.entry_from_record(record)?);
        }
        Ok(entries)
    }

    /// Resolves a directory path to (extent, size): the path table first,
    /// then a recursive walk from the root for anything the table cannot
    /// see (Rock Ridge names, relocated directories).
    fn resolve_dir(&mut self, path: &str) -> Result<(u32, u32), IsoError> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return Ok((self.root_extent, self.root_size));
        }

        let canonical: String = segments
            .iter()
            .map(|s| canonical_name(s, true))
            .collect::<Vec<_>>()
            .join("/");
        if let Some(extent) = self.path_table.locate(&canonical) {
            let size = self.directory_size_at(extent)?;
            return Ok((extent, size));
        }

        let entry = self
            .walk(&segments)?
            .ok_or_else(|| IsoError::NotFound(path.to_string()))?;
        if !entry.is_dir {
            return Err(IsoError::NotFound(path.to_string()));
        }
        Ok((entry.extent, entry.size as u32))
    }

    fn walk(&mut self, segments: &[String]) -> Result<Option<DirEntry>, IsoError> {
        let mut location = (self.root_extent, self.root_size);
        let mut current: Option<DirEntry> = None;
        for segment in segments {
            if let Some(entry) = &current {
                if !entry.is_dir {
                    return Ok(None);
                }
                location = (entry.extent, entry.size as u32);
            }
            let entries = self.entries_at(location.0, location.1)?;
            let matched = entries.into_iter().find(|e| entry_matches(e, segment));
            match matched {
                Some(entry) => current = Some(entry),
                None => return Ok(None),
            }
        }
        Ok(current)
    }

    /// Lists a directory. Hidden entries and relocated directories are
    /// omitted; child links were already followed.
    pub fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, IsoError> {
        let (extent, size) = self.resolve_dir(path)?;
        let entries = self.entries_at(extent, size)?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.hidden && !e.relocated)
            .collect())
    }

    /// Metadata for one path.
    pub fn stat(&mut self, path: &str) -> Result<DirEntry, IsoError> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return Ok(DirEntry {
                name: "/".to_string(),
                short_name: ".".to_string(),
                is_dir: true,
                size: self.root_size as u64,
                extent: self.root_extent,
                mode: None,
                nlink: None,
                symlink: None,
                recorded: None,
                hidden: false,
                relocated: false,
            });
        }
        self.walk(&segments)?
            .ok_or_else(|| IsoError::NotFound(path.to_string()))
    }

    /// Reads a whole file.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, IsoError> {
        let entry = self.stat(path)?;
        if entry.is_dir {
            return Err(IsoError::NotFound(path.to_string()));
        }
        self.read_blocks(entry.extent, entry.size as usize)
    }

    /// The boot catalog, when the descriptor set announces one.
    #[cfg(feature = "el-torito")]
    pub fn boot_catalog(&mut self) -> Result<Option<BootCatalog>, IsoError> {
        let Some(boot) = self.descriptors.boot_record() else {
            return Ok(None);
        };
        if !boot.is_el_torito() {
            return Ok(None);
        }
        let block = boot.catalog_block.get();
        self.data
            .seek(SeekFrom::Start(block as u64 * self.block_size))?;
        Ok(Some(BootCatalog::parse(self.data)?))
    }
}

fn entry_matches(entry: &DirEntry, segment: &str) -> bool {
    if entry.name == segment || entry.short_name == segment {
        return true;
    }
    // "README.MD" finds "README.MD;1".
    entry
        .short_name
        .split_once(';')
        .is_some_and(|(base, _)| base == segment)
}
