//! The composition layer: a [`Disk`] owns a block backend, its sector
//! sizes and an optional partition table; [`FileSystem`] is the contract
//! filesystems expose to callers. The heavy lifting lives in
//! `platter-part` and `platter-iso`; this crate wires them together.

pub mod disk;
pub mod fs;
pub mod iso;

pub use disk::Disk;
pub use fs::{FileStat, FileSystem, FileSystemKind, FsDirEntry, FsError, FsFile, OpenFlags};
pub use iso::IsoFileSystem;

pub use platter_io::{BlockDevice, FileBackend, MemBackend, SectorSize, Window};
pub use platter_part::{GptPartition, GptTable, MbrPartition, MbrTable, Table};
