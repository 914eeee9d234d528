//! Absolute-path normalization for reported matches.
//!
//! Paths travel through the crate as `/`-separated strings so that raw and
//! resolved identities compare the same way regardless of platform.

use std::path::{Component, Path};

/// What [`make_abs`] needs to know about where matching happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsContext {
    /// Absolute working directory relative paths are resolved against.
    pub cwd: String,

    /// Prepended to paths that start with `/`. Empty means the filesystem root.
    pub root: String,
}

impl AbsContext {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self { cwd: cwd.into(), root: String::new() }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }
}

/// Turn a possibly-relative match into its absolute equivalent.
///
/// Leading-`/` paths are joined onto `ctx.root`, other absolute paths and the
/// empty path are returned unchanged, and everything else is resolved against
/// `ctx.cwd`. The result is lexically normalized (no `.`/`..`, no trailing `/`).
pub fn make_abs(ctx: &AbsContext, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    if path.starts_with('/') {
        if ctx.root.is_empty() {
            return normalize(path);
        }
        return normalize(&format!("{}/{}", ctx.root, path));
    }

    if Path::new(path).is_absolute() {
        return to_slash(path);
    }

    normalize(&format!("{}/{}", ctx.cwd, path))
}

/// Lexically normalize a `/`-separated path.
///
/// `..` never climbs above the root of an absolute path; for relative paths
/// leading `..` segments are kept.
pub fn normalize(path: &str) -> String {
    let path = to_slash(path);
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") | None if !absolute => parts.push(".."),
                Some(_) => {
                    parts.pop();
                }
                None => {}
            },
            s => parts.push(s),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Render a filesystem path as a `/`-separated string.
pub fn to_slash(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    if cfg!(windows) {
        return path.to_string_lossy().replace('\\', "/");
    }

    let mut out = String::new();
    for comp in path.components() {
        match comp {
            Component::RootDir => out.push('/'),
            Component::Prefix(p) => out.push_str(&p.as_os_str().to_string_lossy()),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

/// Join two `/`-separated fragments, either of which may be empty.
pub(crate) fn join(prefix: &str, rest: &str) -> String {
    match (prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) if prefix.ends_with('/') => format!("{prefix}{rest}"),
        (false, false) => format!("{prefix}/{rest}"),
    }
}
