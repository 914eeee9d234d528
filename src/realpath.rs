//! Canonical-path resolvers.
//!
//! Both resolvers tag failures with the call that failed so the stream can
//! tell an unreachable symlink target (`stat`) apart from a real error.

use std::collections::VecDeque;
use std::io;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::fs;
use tracing::trace;

use crate::error::{RealpathError, Syscall, LOOP_ERRNO};
use crate::path::{join, normalize, to_slash};
use crate::traits::{RealpathCache, RealpathResolver};

/// Symlinks followed in one resolution before giving up.
const MAX_LINKS: usize = 40;

/// Resolves with the platform's canonicalization.
///
/// An `lstat` failure means the path itself is unreadable or gone. If the
/// path is there but canonicalization fails, a symlink target is unreachable
/// and the failure is tagged [`Syscall::Stat`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRealpath;

impl RealpathResolver for FsRealpath {
    fn resolve(&self, path: String, cache: RealpathCache) -> BoxFuture<'static, Result<String, RealpathError>> {
        async move {
            let meta = fs::symlink_metadata(&path)
                .await
                .map_err(|e| RealpathError::new(Syscall::Lstat, &path, e))?;

            let resolved = fs::canonicalize(&path).await.map_err(|e| {
                let syscall = if meta.file_type().is_symlink() { Syscall::Stat } else { Syscall::Realpath };
                RealpathError::new(syscall, &path, e)
            })?;

            let resolved = to_slash(resolved);
            trace!(path = %path, resolved = %resolved, "realpath");
            cache.write().insert(path, resolved.clone());
            Ok(resolved)
        }
        .boxed()
    }
}

/// Resolves component by component, consulting the cache for every prefix.
///
/// Used when the caller pre-seeded a realpath cache, so seeded entries apply
/// to any path running through them, not just exact hits.
#[derive(Debug, Default, Clone, Copy)]
pub struct CachedRealpath;

impl RealpathResolver for CachedRealpath {
    fn resolve(&self, path: String, cache: RealpathCache) -> BoxFuture<'static, Result<String, RealpathError>> {
        resolve_cached(path, cache).boxed()
    }
}

async fn resolve_cached(original: String, cache: RealpathCache) -> Result<String, RealpathError> {
    if let Some(hit) = cache.read().get(&original).cloned() {
        return Ok(hit);
    }

    let mut pending: VecDeque<String> = normalize(&original)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let mut current = String::from("/");
    let mut links = 0;

    while let Some(part) = pending.pop_front() {
        match part.as_str() {
            "." => continue,
            ".." => {
                current = parent(&current);
                continue;
            }
            _ => {}
        }

        let next = join(&current, &part);
        let hit = cache.read().get(&next).cloned();
        if let Some(hit) = hit {
            current = hit;
            continue;
        }

        let meta = fs::symlink_metadata(&next)
            .await
            .map_err(|e| RealpathError::new(Syscall::Lstat, &next, e))?;
        if !meta.file_type().is_symlink() {
            cache.write().insert(next.clone(), next.clone());
            current = next;
            continue;
        }

        links += 1;
        if links > MAX_LINKS {
            return Err(RealpathError::new(Syscall::Readlink, &next, io::Error::from_raw_os_error(LOOP_ERRNO)));
        }

        // The target must exist before it is worth reading the link.
        fs::metadata(&next).await.map_err(|e| RealpathError::new(Syscall::Stat, &next, e))?;
        let target = fs::read_link(&next)
            .await
            .map_err(|e| RealpathError::new(Syscall::Readlink, &next, e))?;
        let target = to_slash(target);

        if target.starts_with('/') {
            current = String::from("/");
        }
        for comp in target.split('/').rev().filter(|s| !s.is_empty()) {
            pending.push_front(comp.to_string());
        }
    }

    trace!(path = %original, resolved = %current, "realpath (cached)");
    cache.write().insert(original, current.clone());
    Ok(current)
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => String::from("/"),
        Some(i) => path[..i].to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::symlink;
    use std::sync::Arc;

    use parking_lot::RwLock;

    fn empty_cache() -> RealpathCache {
        Arc::new(RwLock::new(HashMap::new()))
    }

    /// A canonical temp dir holding `file`, `link -> file` and `dangling -> missing`.
    fn setup() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let root = to_slash(std::fs::canonicalize(dir.path()).unwrap());
        std::fs::write(dir.path().join("file"), "x").unwrap();
        symlink("file", dir.path().join("link")).unwrap();
        symlink("missing", dir.path().join("dangling")).unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn fs_realpath_follows_links_and_caches() {
        let (_dir, root) = setup();
        let cache = empty_cache();
        let link = format!("{root}/link");
        let resolved = FsRealpath.resolve(link.clone(), Arc::clone(&cache)).await.unwrap();
        assert_eq!(resolved, format!("{root}/file"));
        assert_eq!(cache.read().get(&link), Some(&resolved));
    }

    #[tokio::test]
    async fn fs_realpath_tags_failures() {
        let (_dir, root) = setup();
        let err = FsRealpath.resolve(format!("{root}/dangling"), empty_cache()).await.unwrap_err();
        assert!(err.is_stat());

        let err = FsRealpath.resolve(format!("{root}/absent"), empty_cache()).await.unwrap_err();
        assert_eq!(err.syscall, Syscall::Lstat);
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn cached_realpath_matches_fs_realpath() {
        let (_dir, root) = setup();
        let resolved = CachedRealpath.resolve(format!("{root}/link"), empty_cache()).await.unwrap();
        assert_eq!(resolved, format!("{root}/file"));

        let err = CachedRealpath.resolve(format!("{root}/dangling"), empty_cache()).await.unwrap_err();
        assert!(err.is_stat());

        let err = CachedRealpath.resolve(format!("{root}/absent"), empty_cache()).await.unwrap_err();
        assert_eq!(err.syscall, Syscall::Lstat);
    }

    #[tokio::test]
    async fn cached_realpath_honours_seeded_prefixes() {
        let (_dir, root) = setup();
        let cache = empty_cache();
        cache.write().insert(format!("{root}/virtual"), format!("{root}"));

        let resolved = CachedRealpath.resolve(format!("{root}/virtual/link"), cache).await.unwrap();
        assert_eq!(resolved, format!("{root}/file"));
    }

    #[tokio::test]
    async fn cached_realpath_handles_relative_parent_targets() {
        let (dir, root) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        symlink("../file", dir.path().join("sub/up")).unwrap();

        let resolved = CachedRealpath.resolve(format!("{root}/sub/up"), empty_cache()).await.unwrap();
        assert_eq!(resolved, format!("{root}/file"));
    }

    #[test]
    fn parent_stops_at_root() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
    }
}
