//! The filesystem contract consumed by callers and implemented by the
//! per-format crates. File handles follow POSIX shapes: positional and
//! streaming reads, an open-flags bitset, metadata via `stat`.

use std::io::{Read, Seek, Write};

use platter_iso::IsoError;
use platter_part::PartError;

/// Filesystem types the dispatcher recognizes. Only ISO 9660 has an
/// implementation in this workspace; the other tags exist so probing can
/// name what it found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSystemKind {
    Fat32,
    Iso9660,
    Squashfs,
    Ext4,
}

impl core::fmt::Display for FileSystemKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Fat32 => "fat32",
            Self::Iso9660 => "iso9660",
            Self::Squashfs => "squashfs",
            Self::Ext4 => "ext4",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Iso(#[from] IsoError),

    #[error(transparent)]
    Part(#[from] PartError),

    #[error("filesystem is read-only")]
    ReadOnly,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

bitflags::bitflags! {
    /// POSIX-style open flags. Read-only is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 1 << 0;
        const RDWR   = 1 << 1;
        const APPEND = 1 << 2;
        const CREATE = 1 << 3;
        const TRUNC  = 1 << 4;
        const EXCL   = 1 << 5;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    /// Whether the flags request any form of write access.
    pub fn writes(&self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR | OpenFlags::APPEND)
    }
}

#[derive(Debug, Clone)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FsDirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// An open file. Streaming access comes from the supertraits; positional
/// access and metadata from the methods here.
pub trait FsFile: Read + Write + Seek {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, FsError>;
    fn stat(&mut self) -> Result<FileStat, FsError>;
}

/// Operations every filesystem implementation exposes. The Rock Ridge
/// metadata calls default to [`FsError::NotSupported`].
pub trait FileSystem {
    fn kind(&self) -> FileSystemKind;
    fn mkdir(&mut self, path: &str) -> Result<(), FsError>;
    fn read_dir(&mut self, path: &str) -> Result<Vec<FsDirEntry>, FsError>;
    fn open_file(&mut self, path: &str, flags: OpenFlags) -> Result<Box<dyn FsFile>, FsError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError>;
    fn remove(&mut self, path: &str) -> Result<(), FsError>;
    fn label(&mut self) -> Result<String, FsError>;
    fn set_label(&mut self, label: &str) -> Result<(), FsError>;

    fn chmod(&mut self, _path: &str, _mode: u32) -> Result<(), FsError> {
        Err(FsError::NotSupported("chmod"))
    }

    fn chown(&mut self, _path: &str, _uid: u32, _gid: u32) -> Result<(), FsError> {
        Err(FsError::NotSupported("chown"))
    }

    fn mknod(&mut self, _path: &str, _mode: u32, _dev: u64) -> Result<(), FsError> {
        Err(FsError::NotSupported("mknod"))
    }

    fn symlink(&mut self, _target: &str, _link: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported("symlink"))
    }

    fn link(&mut self, _target: &str, _link: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported("link"))
    }
}

/// Identifies the filesystem in a byte range by its magic numbers.
pub fn probe_kind<B: platter_io::BlockDevice>(
    device: &mut B,
    base: u64,
) -> std::io::Result<Option<FileSystemKind>> {
    let mut buf = [0u8; 8];

    // ISO 9660: "CD001" one byte into the descriptor at 32 KiB.
    if device.read_exact_at(&mut buf[..6], base + 32768).is_ok() && &buf[1..6] == b"CD001" {
        return Ok(Some(FileSystemKind::Iso9660));
    }
    // SquashFS: "hsqs" at offset 0.
    if device.read_exact_at(&mut buf[..4], base).is_ok() && &buf[..4] == b"hsqs" {
        return Ok(Some(FileSystemKind::Squashfs));
    }
    // ext4: 0xEF53 at offset 1080 of the superblock.
    if device.read_exact_at(&mut buf[..2], base + 1080).is_ok() && buf[..2] == [0x53, 0xEF] {
        return Ok(Some(FileSystemKind::Ext4));
    }
    // FAT32: "FAT32   " at offset 82 of the boot sector.
    if device.read_exact_at(&mut buf[..8], base + 82).is_ok() && &buf[..8] == b"FAT32   " {
        return Ok(Some(FileSystemKind::Fat32));
    }
    Ok(None)
}
