//! ISO 9660 without a kernel in sight: a staged builder that lays out
//! bit-exact images (directory records, both path tables, optional
//! SUSP/Rock Ridge and El Torito), and a reader that walks them back.
//!
//! Writing goes through [`StageTree`] + [`format_new`]/[`format_file`];
//! reading through [`IsoImage::parse`].

use std::path::PathBuf;

#[cfg(feature = "el-torito")]
pub mod boot;
pub mod datetime;
pub mod finalize;
pub mod image;
pub mod path_table;
pub mod record;
pub mod stage;
pub mod susp;
pub mod types;
pub mod volume;

#[cfg(feature = "el-torito")]
pub use boot::{BootEntryOptions, ElToritoOptions, EmulationType, PlatformId};
pub use finalize::{FormatOptions, LayoutSummary, format_file, format_new};
pub use image::{DirEntry, IsoImage};
pub use stage::{FileSource, StageTree};
pub use types::canonical_name;

/// Errors from the ISO 9660 codecs and the finalizer.
#[derive(Debug, thiserror::Error)]
pub enum IsoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid {0}")]
    InvalidFormat(&'static str),

    #[error("checksum mismatch in {0}")]
    ChecksumMismatch(&'static str),

    #[error("invalid identifier: {0:?}")]
    InvalidName(String),

    #[error("directory tree exceeds eight levels; enable rock ridge to relocate")]
    TooDeep,

    #[error("staging workspace {0:?} is missing or not a directory")]
    InvalidWorkspace(PathBuf),

    #[error("filesystem is read-only")]
    ReadOnly,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}
