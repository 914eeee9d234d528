use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlobError {
    // Validation
    #[error("Expected a glob pattern string, but got {0}.")]
    InvalidPatternType(String),

    #[error("Expected a non-empty glob pattern string, but got ''.")]
    EmptyPattern,

    #[error("{0}")]
    InvalidOptions(String),

    #[error(
        "`{option}` option is deprecated and there's no need to pass any values \
         to that option, but {value} was provided."
    )]
    DeprecatedOption { option: &'static str, value: String },

    // Source
    #[error("invalid glob pattern `{pattern}`: {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("symlink loop: {}", .0.display())]
    SymlinkLoop(PathBuf),

    #[error("IO error: {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("source error: {0}")]
    Source(String),

    // Resolution
    #[error(transparent)]
    Realpath(#[from] RealpathError),

    // Runtime
    #[error("no tokio runtime available to drive the subscription")]
    NoRuntime,
}

impl GlobError {
    /// The path this error occurred at, if applicable.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::PermissionDenied(p) | Self::SymlinkLoop(p) | Self::Io { path: p, .. } => Some(p),
            Self::Realpath(e) => Some(&e.path),
            _ => None,
        }
    }

    /// Whether this is a bad call rather than a failed operation.
    ///
    /// Validation errors are only ever returned from
    /// [`GlobStream::subscribe`](crate::GlobStream::subscribe); they never
    /// travel through a subscription's stream.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPatternType(_)
                | Self::EmptyPattern
                | Self::InvalidOptions(_)
                | Self::DeprecatedOption { .. }
        )
    }

    /// Errno-style code (`ENOENT`, `EACCES`, ...) for I/O-backed errors.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::PermissionDenied(_) => Some("EACCES"),
            Self::SymlinkLoop(_) => Some("ELOOP"),
            Self::Io { source, .. } => Some(io_code(source)),
            Self::Realpath(e) => Some(io_code(&e.source)),
            _ => None,
        }
    }
}

/// The filesystem call a realpath resolution failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Lstat,
    Stat,
    Readlink,
    Realpath,
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lstat => "lstat",
            Self::Stat => "stat",
            Self::Readlink => "readlink",
            Self::Realpath => "realpath",
        })
    }
}

/// A failed canonical-path lookup, tagged with the call that failed.
#[derive(Error, Debug)]
#[error("{syscall} failed for {}: {source}", path.display())]
pub struct RealpathError {
    pub syscall: Syscall,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl RealpathError {
    pub fn new(syscall: Syscall, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self { syscall, path: path.into(), source }
    }

    /// A `stat` failure means the target of a symlink is unreachable.
    /// The stream recovers from these instead of failing.
    pub fn is_stat(&self) -> bool {
        self.syscall == Syscall::Stat
    }
}

fn io_code(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::NotFound => "ENOENT",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::AlreadyExists => "EEXIST",
        io::ErrorKind::InvalidInput => "EINVAL",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::Interrupted => "EINTR",
        _ => match e.raw_os_error() {
            Some(20) => "ENOTDIR",
            Some(21) => "EISDIR",
            Some(code) if code == LOOP_ERRNO => "ELOOP",
            Some(code) if code == NAME_TOO_LONG_ERRNO => "ENAMETOOLONG",
            _ => "EIO",
        },
    }
}

#[cfg(target_os = "macos")]
pub(crate) const LOOP_ERRNO: i32 = 62;
#[cfg(not(target_os = "macos"))]
pub(crate) const LOOP_ERRNO: i32 = 40;

#[cfg(target_os = "macos")]
pub(crate) const NAME_TOO_LONG_ERRNO: i32 = 63;
#[cfg(not(target_os = "macos"))]
pub(crate) const NAME_TOO_LONG_ERRNO: i32 = 36;
