use std::fs::Metadata;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A single result delivered by a [`Subscription`](crate::Subscription).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// The working directory the source matched against, absolute.
    pub cwd: String,

    /// The matched path. Relative to `cwd` for relative patterns unless
    /// `absolute` or `realpath` was requested.
    pub path: String,

    /// Filesystem metadata, present only when the `stat` option is set and
    /// the source's stat cache holds an entry for this path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat: Option<FileStat>,
}

/// Filesystem metadata as kept in a source's stat cache.
///
/// A plain data record rather than [`std::fs::Metadata`] so callers can
/// pre-seed the cache through the `statCache` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub kind: EntryKind,

    pub size: u64,

    /// Unix permission and type bits; `0` where the platform has none.
    #[serde(default)]
    pub mode: u32,

    #[serde(default)]
    pub modified: Option<SystemTime>,
}

impl FileStat {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_file() {
            EntryKind::File
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::Other
        };

        Self {
            kind,
            size: meta.len(),
            mode: mode_of(meta),
            modified: meta.modified().ok(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

/// The kind of a matched entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A regular file.
    File,

    /// A directory.
    Dir,

    /// A symbolic link whose target could not be reached.
    Symlink,

    /// Anything else (device files, pipes, sockets, etc.).
    Other,
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_of(_meta: &Metadata) -> u32 {
    0
}
