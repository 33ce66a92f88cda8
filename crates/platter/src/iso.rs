//! ISO 9660 behind the [`FileSystem`] contract.
//!
//! A fresh filesystem starts in workspace mode: a scratch directory on
//! the host absorbs every mutation, nothing touches the image. Finalize
//! stages the scratch tree, writes the image in one pass, deletes the
//! scratch area and leaves the handle in frozen (read-only) mode —
//! exactly the mode an existing image opens in.

use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use platter_io::{BlockDevice, Window};
use platter_iso::{FormatOptions, IsoImage, LayoutSummary, StageTree, format_new};
use tempfile::TempDir;

use crate::fs::{
    FileStat, FileSystem, FileSystemKind, FsDirEntry, FsError, FsFile, OpenFlags,
};

enum Mode {
    Workspace { scratch: TempDir, label: String },
    Frozen,
}

pub struct IsoFileSystem<B> {
    device: B,
    mode: Mode,
}

impl<B: BlockDevice> IsoFileSystem<B> {
    /// Starts a new filesystem in workspace mode.
    pub fn create(device: B, label: &str) -> Result<Self, FsError> {
        let scratch = TempDir::new()?;
        log::debug!("iso workspace at {:?}", scratch.path());
        Ok(Self {
            device,
            mode: Mode::Workspace {
                scratch,
                label: label.to_string(),
            },
        })
    }

    /// Opens an existing image read-only, validating its descriptors.
    pub fn open(device: B) -> Result<Self, FsError> {
        let mut fs = Self {
            device,
            mode: Mode::Frozen,
        };
        fs.with_image(|_| Ok(()))?;
        Ok(fs)
    }

    /// Freezes the workspace into the backing device. The scratch
    /// directory is deleted; the handle becomes read-only.
    pub fn finalize(&mut self, options: FormatOptions) -> Result<LayoutSummary, FsError> {
        let Mode::Workspace { scratch, label } = &self.mode else {
            return Err(FsError::ReadOnly);
        };
        let tree = StageTree::from_dir(scratch.path())?;
        let options = options.with_volume_id(&label.to_ascii_uppercase());
        let mut window = Window::new(&mut self.device, 0, u64::MAX);
        let summary = format_new(&mut window, &tree, &options)?;
        self.mode = Mode::Frozen;
        Ok(summary)
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.mode, Mode::Frozen)
    }

    pub fn into_device(self) -> B {
        self.device
    }

    fn with_image<T>(
        &mut self,
        f: impl FnOnce(&mut IsoImage<Window<&mut B>>) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let mut window = Window::whole(&mut self.device)?;
        let mut image = IsoImage::parse(&mut window)?;
        f(&mut image)
    }

    /// Maps a filesystem path into the scratch directory, refusing
    /// escapes.
    fn scratch_path(&self, path: &str) -> Result<PathBuf, FsError> {
        let Mode::Workspace { scratch, .. } = &self.mode else {
            return Err(FsError::ReadOnly);
        };
        let mut out = scratch.path().to_path_buf();
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." {
                return Err(FsError::InvalidArgument(format!(
                    "path {path:?} escapes the workspace"
                )));
            }
            out.push(segment);
        }
        Ok(out)
    }
}

impl<B: BlockDevice> FileSystem for IsoFileSystem<B> {
    fn kind(&self) -> FileSystemKind {
        FileSystemKind::Iso9660
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        let host = self.scratch_path(path)?;
        fs::create_dir_all(host)?;
        Ok(())
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<FsDirEntry>, FsError> {
        match &self.mode {
            Mode::Workspace { .. } => {
                let host = self.scratch_path(path)?;
                let mut entries = Vec::new();
                for entry in fs::read_dir(host)? {
                    let entry = entry?;
                    let meta = entry.metadata()?;
                    entries.push(FsDirEntry {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        is_dir: meta.is_dir(),
                        size: meta.len(),
                    });
                }
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            }
            Mode::Frozen => self.with_image(|image| {
                Ok(image
                    .read_dir(path)?
                    .into_iter()
                    .map(|e| FsDirEntry {
                        name: e.name,
                        is_dir: e.is_dir,
                        size: e.size,
                    })
                    .collect())
            }),
        }
    }

    fn open_file(&mut self, path: &str, flags: OpenFlags) -> Result<Box<dyn FsFile>, FsError> {
        match &self.mode {
            Mode::Workspace { .. } => {
                let host = self.scratch_path(path)?;
                let mut opts = fs::OpenOptions::new();
                opts.read(true);
                if flags.writes() {
                    opts.write(true);
                }
                if flags.contains(OpenFlags::APPEND) {
                    opts.append(true);
                }
                if flags.contains(OpenFlags::CREATE) {
                    opts.create(true);
                }
                if flags.contains(OpenFlags::TRUNC) {
                    opts.truncate(true);
                }
                if flags.contains(OpenFlags::EXCL) {
                    opts.create_new(true);
                }
                let file = opts.open(&host).map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
                    io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
                    _ => FsError::Io(e),
                })?;
                Ok(Box::new(HostFile { file }))
            }
            Mode::Frozen => {
                if flags.writes() {
                    return Err(FsError::ReadOnly);
                }
                let (data, stat) = self.with_image(|image| {
                    let entry = image.stat(path)?;
                    if entry.is_dir {
                        return Err(FsError::NotFound(path.to_string()));
                    }
                    let data = image.read_file(path)?;
                    Ok((
                        data,
                        FileStat {
                            size: entry.size,
                            is_dir: false,
                            mode: entry.mode,
                        },
                    ))
                })?;
                Ok(Box::new(FrozenFile {
                    data: Cursor::new(data),
                    stat,
                }))
            }
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        let from = self.scratch_path(from)?;
        let to = self.scratch_path(to)?;
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        let host = self.scratch_path(path)?;
        let meta = fs::metadata(&host).map_err(|_| FsError::NotFound(path.to_string()))?;
        if meta.is_dir() {
            fs::remove_dir(host)?;
        } else {
            fs::remove_file(host)?;
        }
        Ok(())
    }

    fn label(&mut self) -> Result<String, FsError> {
        match &self.mode {
            Mode::Workspace { label, .. } => Ok(label.clone()),
            Mode::Frozen => self.with_image(|image| Ok(image.label())),
        }
    }

    fn set_label(&mut self, label: &str) -> Result<(), FsError> {
        match &mut self.mode {
            Mode::Workspace { label: slot, .. } => {
                *slot = label.to_string();
                Ok(())
            }
            Mode::Frozen => Err(FsError::ReadOnly),
        }
    }
}

/// A workspace-mode file handle, delegating to the host filesystem.
struct HostFile {
    file: fs::File,
}

impl Read for HostFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for HostFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for HostFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl FsFile for HostFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let restore = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(offset))?;
        let n = self.file.read(buf)?;
        self.file.seek(SeekFrom::Start(restore))?;
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, FsError> {
        let restore = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(offset))?;
        let n = self.file.write(buf)?;
        self.file.seek(SeekFrom::Start(restore))?;
        Ok(n)
    }

    fn stat(&mut self) -> Result<FileStat, FsError> {
        let meta = self.file.metadata()?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            mode: None,
        })
    }
}

/// A frozen-mode handle over a file snapshot; writes are refused.
struct FrozenFile {
    data: Cursor<Vec<u8>>,
    stat: FileStat,
}

impl Read for FrozenFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Write for FrozenFile {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "filesystem is read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FrozenFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

impl FsFile for FrozenFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, FsError> {
        let restore = self.data.position();
        self.data.seek(SeekFrom::Start(offset))?;
        let n = self.data.read(buf)?;
        self.data.set_position(restore);
        Ok(n)
    }

    fn write_at(&mut self, _buf: &[u8], _offset: u64) -> Result<usize, FsError> {
        Err(FsError::ReadOnly)
    }

    fn stat(&mut self) -> Result<FileStat, FsError> {
        Ok(self.stat.clone())
    }
}
