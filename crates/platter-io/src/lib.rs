//! Platter IO
//!
//! Random-access block backends for the platter disk-image crates. A
//! [`BlockDevice`] is an opened image with a byte length and a read-only
//! flag; everything above it (partition tables, filesystems) addresses it
//! by absolute byte offset and never goes through a kernel mount.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub use std::io::{Error, ErrorKind, Result};

/// Sector granularity of a backend, chosen at open time and fixed for the
/// lifetime of the device.
#[repr(u32)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SectorSize {
    #[default]
    S512 = 512,
    S4096 = 4096,
}

impl SectorSize {
    pub const fn bytes(self) -> u64 {
        self as u32 as u64
    }

    /// Accepts 512 or 4096, rejects everything else.
    pub fn from_bytes(bytes: u32) -> io::Result<Self> {
        match bytes {
            512 => Ok(Self::S512),
            4096 => Ok(Self::S4096),
            other => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("unsupported sector size {other}, expected 512 or 4096"),
            )),
        }
    }
}

/// A random-access block backend.
///
/// `read_at` and `write_at` may return short counts; callers that need the
/// full transfer use [`BlockDevice::read_exact_at`] and
/// [`BlockDevice::write_all_at`], which retry until satisfied or failed.
pub trait BlockDevice {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Total size of the backing image in bytes.
    fn len(&mut self) -> io::Result<u64>;

    fn is_read_only(&self) -> bool;

    /// Escape hatch to the backing [`File`], when there is one.
    fn sys(&mut self) -> Option<&mut File> {
        None
    }

    fn read_exact_at(&mut self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "short read from block device",
                    ));
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn write_all_at(&mut self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "short write to block device",
                    ));
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(buf, offset)
    }

    fn len(&mut self) -> io::Result<u64> {
        (**self).len()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }

    fn sys(&mut self) -> Option<&mut File> {
        (**self).sys()
    }
}

/// A [`BlockDevice`] over an opened file or raw block special file.
#[derive(Debug)]
pub struct FileBackend {
    file: File,
    read_only: bool,
    sector_size: SectorSize,
}

impl FileBackend {
    /// Opens an existing image read-write.
    pub fn open<P: AsRef<Path>>(path: P, sector_size: SectorSize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            read_only: false,
            sector_size,
        })
    }

    /// Opens an existing image read-only; writes fail with a permission error.
    pub fn open_read_only<P: AsRef<Path>>(path: P, sector_size: SectorSize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            file,
            read_only: true,
            sector_size,
        })
    }

    /// Creates (or truncates) an image file of `size` bytes.
    pub fn create<P: AsRef<Path>>(path: P, size: u64, sector_size: SectorSize) -> io::Result<Self> {
        if size % sector_size.bytes() != 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "image size is not a multiple of the sector size",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        log::debug!("created image backend of {size}b");
        Ok(Self {
            file,
            read_only: false,
            sector_size,
        })
    }

    pub fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

impl BlockDevice for FileBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        if self.read_only {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                "backend is read-only",
            ));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write(buf)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn sys(&mut self) -> Option<&mut File> {
        Some(&mut self.file)
    }
}

/// An in-memory backend, mostly for tests and small scratch images.
#[derive(Debug, Default, Clone)]
pub struct MemBackend {
    data: Vec<u8>,
    read_only: bool,
}

impl MemBackend {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            read_only: false,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl BlockDevice for MemBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        if self.read_only {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                "backend is read-only",
            ));
        }
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "write past end of in-memory image",
            ));
        }
        let n = buf.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// A byte-range window over a [`BlockDevice`] exposing [`Read`], [`Write`]
/// and [`Seek`], so stream-oriented codecs can work inside a partition
/// without knowing the absolute disk offsets.
#[derive(Debug)]
pub struct Window<B> {
    device: B,
    base: u64,
    size: u64,
    pos: u64,
}

impl<B: BlockDevice> Window<B> {
    pub fn new(device: B, base: u64, size: u64) -> Self {
        Self {
            device,
            base,
            size,
            pos: 0,
        }
    }

    /// Window over the whole device.
    pub fn whole(mut device: B) -> io::Result<Self> {
        let size = device.len()?;
        Ok(Self::new(device, 0, size))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn into_inner(self) -> B {
        self.device
    }
}

impl<B: BlockDevice> BlockDevice for Window<B> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let want = buf.len().min((self.size - offset) as usize);
        self.device.read_at(&mut buf[..want], self.base + offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "write past end of window",
            ));
        }
        let want = buf.len().min((self.size - offset) as usize);
        self.device.write_at(&buf[..want], self.base + offset)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn is_read_only(&self) -> bool {
        self.device.is_read_only()
    }

    fn sys(&mut self) -> Option<&mut File> {
        self.device.sys()
    }
}

impl<B: BlockDevice> Read for Window<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Ok(0);
        }
        let remaining = (self.size - self.pos) as usize;
        let want = buf.len().min(remaining);
        let n = self.device.read_at(&mut buf[..want], self.base + self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<B: BlockDevice> Write for Window<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Err(io::Error::new(
                ErrorKind::WriteZero,
                "write past end of window",
            ));
        }
        let remaining = (self.size - self.pos) as usize;
        let want = buf.len().min(remaining);
        let n = self.device.write_at(&buf[..want], self.base + self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.device.sys() {
            file.flush()?;
        }
        Ok(())
    }
}

impl<B: BlockDevice> Seek for Window<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.size.checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };
        match next {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "seek to a negative offset",
            )),
        }
    }
}
