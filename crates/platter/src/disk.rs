//! A [`Disk`] is one backend plus its sector geometry and whatever
//! partition table was found (or put) on it.

use std::io;
use std::path::Path;

use platter_io::{BlockDevice, FileBackend, SectorSize, Window};
use platter_part::{PartError, Table, read_table};

use crate::fs::{FileSystemKind, probe_kind};

#[derive(Debug)]
pub struct Disk<B> {
    backend: B,
    logical: SectorSize,
    physical: SectorSize,
    table: Option<Table>,
}

impl Disk<FileBackend> {
    /// Opens an existing image file and probes it for a partition table.
    pub fn open<P: AsRef<Path>>(path: P, sector_size: SectorSize) -> Result<Self, PartError> {
        let backend = FileBackend::open(path, sector_size)?;
        let mut disk = Self::new(backend, sector_size, sector_size);
        disk.detect_table()?;
        Ok(disk)
    }

    /// Creates a zero-filled image file of `size` bytes.
    pub fn create<P: AsRef<Path>>(
        path: P,
        size: u64,
        sector_size: SectorSize,
    ) -> io::Result<Self> {
        let backend = FileBackend::create(path, size, sector_size)?;
        Ok(Self::new(backend, sector_size, sector_size))
    }
}

impl<B: BlockDevice> Disk<B> {
    /// Wraps an already-open backend. Sector sizes are fixed from here on.
    pub fn new(backend: B, logical: SectorSize, physical: SectorSize) -> Self {
        Self {
            backend,
            logical,
            physical,
            table: None,
        }
    }

    pub fn logical_sector_size(&self) -> SectorSize {
        self.logical
    }

    pub fn physical_sector_size(&self) -> SectorSize {
        self.physical
    }

    pub fn size(&mut self) -> io::Result<u64> {
        self.backend.len()
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn table_mut(&mut self) -> Option<&mut Table> {
        self.table.as_mut()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Probes the backend for a table and remembers what it found.
    pub fn detect_table(&mut self) -> Result<Option<&Table>, PartError> {
        self.table = read_table(&mut self.backend, self.logical)?;
        if let Some(table) = &self.table {
            log::debug!("found {} partition table", table.kind());
        }
        Ok(self.table.as_ref())
    }

    /// Writes `table` to the backend and adopts it as this disk's table.
    pub fn apply_table(&mut self, table: Table) -> Result<(), PartError> {
        table.write_to(&mut self.backend)?;
        self.table = Some(table);
        Ok(())
    }

    /// Byte range of partition `index` under the current table.
    pub fn partition_range(&self, index: usize) -> Result<(u64, u64), PartError> {
        let ss = self.logical.bytes();
        match &self.table {
            Some(Table::Gpt(gpt)) => {
                let part = gpt
                    .partitions()
                    .get(index)
                    .filter(|p| !p.is_unused())
                    .ok_or_else(|| PartError::NotFound(format!("partition {index}")))?;
                Ok((part.first_lba * ss, part.size_bytes()))
            }
            Some(Table::Mbr(mbr)) => {
                let part = mbr
                    .partitions
                    .get(index)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| PartError::NotFound(format!("partition {index}")))?;
                Ok((part.start_lba as u64 * ss, part.sectors as u64 * ss))
            }
            None => Err(PartError::NotFound("partition table".to_string())),
        }
    }

    /// A read/write window over one partition, for handing to a
    /// filesystem codec.
    pub fn partition_window(&mut self, index: usize) -> Result<Window<&mut B>, PartError> {
        let (base, size) = self.partition_range(index)?;
        Ok(Window::new(&mut self.backend, base, size))
    }

    /// Filesystem magic sniffing inside partition `index`.
    pub fn probe_partition(&mut self, index: usize) -> Result<Option<FileSystemKind>, PartError> {
        let (base, _) = self.partition_range(index)?;
        Ok(probe_kind(&mut self.backend, base)?)
    }

    /// Filesystem magic sniffing over the whole backend (unpartitioned
    /// images such as plain ISOs).
    pub fn probe(&mut self) -> io::Result<Option<FileSystemKind>> {
        probe_kind(&mut self.backend, 0)
    }
}
