//! The staging tree a finalize run consumes: a deterministic answer to
//! "list children" and "read file bytes", either captured from a host
//! directory or assembled in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::IsoError;

/// Where a staged file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file on the host filesystem, read at write-out time.
    Host(PathBuf),
    /// Bytes held in memory.
    Data(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub source: FileSource,
    pub size: u64,
    /// POSIX mode bits, carried into Rock Ridge `PX` entries.
    pub mode: u32,
}

impl StagedFile {
    pub fn open(&self) -> std::io::Result<Box<dyn Read>> {
        match &self.source {
            FileSource::Host(path) => Ok(Box::new(fs::File::open(path)?)),
            FileSource::Data(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
        }
    }
}

/// Relative paths (`/`-separated, no leading slash) for every directory
/// and file to be placed in the image. Iteration order is the sorted path
/// order, so two walks over the same tree agree.
#[derive(Debug, Default, Clone)]
pub struct StageTree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, StagedFile>,
}

fn normalize(path: &str) -> Result<String, IsoError> {
    let cleaned: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if cleaned.iter().any(|s| *s == "..") {
        return Err(IsoError::InvalidArgument(format!(
            "path {path:?} escapes the staging root"
        )));
    }
    Ok(cleaned.join("/"))
}

impl StageTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a directory (and its ancestors).
    pub fn add_dir(&mut self, path: &str) -> Result<(), IsoError> {
        let path = normalize(path)?;
        if path.is_empty() {
            return Ok(());
        }
        let mut prefix = String::new();
        for segment in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            self.dirs.insert(prefix.clone());
        }
        Ok(())
    }

    /// Stages in-memory bytes at `path`, creating parent directories.
    pub fn add_file_data(&mut self, path: &str, data: Vec<u8>) -> Result<(), IsoError> {
        self.add_file(path, FileSource::Data(data), 0o644)
    }

    pub fn add_file(&mut self, path: &str, source: FileSource, mode: u32) -> Result<(), IsoError> {
        let path = normalize(path)?;
        if path.is_empty() {
            return Err(IsoError::InvalidArgument("empty file path".to_string()));
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent)?;
        }
        let size = match &source {
            FileSource::Host(host) => fs::metadata(host)?.len(),
            FileSource::Data(data) => data.len() as u64,
        };
        self.files.insert(path, StagedFile { source, size, mode });
        Ok(())
    }

    /// Captures a host directory tree. Symlinks and hardlinks are
    /// followed, so linked content is duplicated into independent
    /// extents.
    pub fn from_dir<P: AsRef<Path>>(root: P) -> Result<Self, IsoError> {
        let root = root.as_ref();
        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(IsoError::InvalidWorkspace(root.to_path_buf())),
        }
        let mut tree = Self::new();
        tree.walk(root, String::new())?;
        Ok(tree)
    }

    fn walk(&mut self, dir: &Path, prefix: String) -> Result<(), IsoError> {
        let mut names: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            names.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
        names.sort();
        for (name, path) in names {
            let staged = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let meta = fs::metadata(&path)?;
            if meta.is_dir() {
                self.dirs.insert(staged.clone());
                self.walk(&path, staged)?;
            } else {
                let mode = host_mode(&meta);
                self.files.insert(
                    staged,
                    StagedFile {
                        source: FileSource::Host(path),
                        size: meta.len(),
                        mode,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &StagedFile)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn file(&self, path: &str) -> Option<&StagedFile> {
        self.files.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

#[cfg(unix)]
fn host_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn host_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn paths_are_normalized_and_parents_created() {
        let mut tree = StageTree::new();
        tree.add_file_data("/a/b/c.txt", b"hello".to_vec()).unwrap();
        let dirs: Vec<_> = tree.dirs().collect();
        assert_eq!(dirs, vec!["a", "a/b"]);
        assert_eq!(tree.file("a/b/c.txt").unwrap().size, 5);
    }

    #[test]
    fn dot_dot_is_rejected() {
        let mut tree = StageTree::new();
        assert!(tree.add_file_data("../escape", Vec::new()).is_err());
    }

    #[test]
    fn from_dir_requires_a_directory() {
        let missing = StageTree::from_dir("/definitely/not/here");
        assert!(matches!(missing, Err(IsoError::InvalidWorkspace(_))));

        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            StageTree::from_dir(file.path()),
            Err(IsoError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn from_dir_captures_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut f = fs::File::create(dir.path().join("sub/file.bin")).unwrap();
        f.write_all(&[1, 2, 3]).unwrap();
        drop(f);
        fs::File::create(dir.path().join("top.txt")).unwrap();

        let tree = StageTree::from_dir(dir.path()).unwrap();
        assert_eq!(tree.dirs().collect::<Vec<_>>(), vec!["sub"]);
        assert_eq!(tree.file("sub/file.bin").unwrap().size, 3);
        assert!(tree.file("top.txt").is_some());
    }
}
