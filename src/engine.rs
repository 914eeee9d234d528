use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use ignore::WalkBuilder;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::entry::FileStat;
use crate::error::{GlobError, LOOP_ERRNO, NAME_TOO_LONG_ERRNO};
use crate::options::Options;
use crate::path::{join, make_abs, normalize, to_slash, AbsContext};
use crate::pattern::{expand_braces, match_options, Segment};
use crate::traits::{MatchSource, SourceEvent, SourceRun, SourceState};

// ---------------------------------------------------------------------------
// GlobSource
// ---------------------------------------------------------------------------

/// The default [`MatchSource`]: walks the filesystem on a worker thread.
///
/// Patterns are brace-expanded into independent sets. Each set is split into
/// a literal walk base and a remainder matched with [`glob::Pattern`]; sets
/// sharing a base share one walk. A path matched by several sets is reported
/// once per set.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobSource;

impl MatchSource for GlobSource {
    fn start(
        &self,
        pattern: &str,
        options: &Options,
        events: UnboundedSender<SourceEvent>,
    ) -> Result<SourceRun, GlobError> {
        let process_cwd = std::env::current_dir()
            .map_err(|source| GlobError::Io { path: PathBuf::from("."), source })?;
        let process_cwd = normalize(&to_slash(process_cwd));

        let cwd = match &options.cwd {
            Some(dir) => make_abs(&AbsContext::new(process_cwd.clone()), &to_slash(dir)),
            None => process_cwd.clone(),
        };

        let state = Arc::new(SourceState {
            changed_cwd: cwd != process_cwd,
            cwd,
            stat_cache: Arc::new(RwLock::new(options.stat_cache.clone())),
            realpath_cache: Arc::new(RwLock::new(options.realpath_cache.clone())),
        });
        let abort = CancellationToken::new();

        let job = Job {
            pattern: pattern.to_string(),
            opts: options.clone(),
            abs: AbsContext::new(state.cwd.clone()),
            state: Arc::clone(&state),
            abort: abort.clone(),
            events,
        };

        std::thread::Builder::new()
            .name("globstream-source".into())
            .spawn(move || job.run())
            .map_err(|source| GlobError::Io { path: PathBuf::from(&state.cwd), source })?;

        Ok(SourceRun::new(state, abort))
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Why a run stopped before its end event.
enum Halt {
    Aborted,
    Failed(GlobError),
}

impl From<GlobError> for Halt {
    fn from(e: GlobError) -> Self {
        Self::Failed(e)
    }
}

/// A walk group: every set sharing one base.
struct WalkGroup {
    prefix: String,
    absolute: bool,
    sets: Vec<WalkSet>,
    depth: Option<usize>,
}

struct WalkSet {
    remainder: Pattern,
    matches_base: bool,
    dir_only: bool,
}

enum Step {
    Literal { path: String, dir_only: bool },
    Walk(WalkGroup),
}

/// Matches of one run, in discovery order.
struct Found {
    paths: Vec<String>,
    seen: HashSet<String>,
    nounique: bool,
}

impl Found {
    fn record(&mut self, path: String) {
        if self.nounique || self.seen.insert(path.clone()) {
            self.paths.push(path);
        }
    }
}

struct Job {
    pattern: String,
    opts: Options,
    abs: AbsContext,
    state: Arc<SourceState>,
    abort: CancellationToken,
    events: UnboundedSender<SourceEvent>,
}

impl Job {
    fn run(self) {
        debug!(pattern = %self.pattern, cwd = %self.state.cwd, changed_cwd = self.state.changed_cwd, "source run started");

        match self.walk_all() {
            Ok(found) => {
                debug!(pattern = %self.pattern, matches = found.len(), "source run finished");
                let _ = self.events.send(SourceEvent::End(found));
            }
            Err(Halt::Aborted) => debug!(pattern = %self.pattern, "source run aborted"),
            Err(Halt::Failed(e)) => {
                debug!(pattern = %self.pattern, error = %e, "source run failed");
                let _ = self.events.send(SourceEvent::Error(e));
            }
        }
    }

    fn walk_all(&self) -> Result<Vec<String>, Halt> {
        let steps = self.plan()?;
        let ignore = IgnoreSet::compile(&self.opts.ignore, self.opts.nocase)?;
        let mut found = Found { paths: Vec::new(), seen: HashSet::new(), nounique: self.opts.nounique };

        for step in &steps {
            if self.abort.is_cancelled() {
                return Err(Halt::Aborted);
            }
            match step {
                Step::Literal { path, dir_only } => self.literal(path, *dir_only, &ignore, &mut found)?,
                Step::Walk(group) => self.walk(group, &ignore, &mut found)?,
            }
        }

        Ok(found.paths)
    }

    /// Expand, compile and group the pattern, keeping first-appearance order.
    fn plan(&self) -> Result<Vec<Step>, GlobError> {
        let globstar = !self.opts.noglobstar;
        let mut steps: Vec<Step> = Vec::new();

        for expanded in expand_braces(&self.pattern) {
            match Segment::compile(&expanded, globstar)? {
                None => {}
                Some(Segment::Literal { path, dir_only }) => steps.push(Step::Literal { path, dir_only }),
                Some(Segment::Walk { prefix, absolute, remainder, depth, matches_base, dir_only }) => {
                    let set = WalkSet { remainder, matches_base, dir_only };
                    let existing = steps.iter_mut().find_map(|s| match s {
                        Step::Walk(g) if g.prefix == prefix && g.absolute == absolute => Some(g),
                        _ => None,
                    });
                    match existing {
                        Some(group) => {
                            group.depth = match (group.depth, depth) {
                                (Some(a), Some(b)) => Some(a.max(b)),
                                _ => None,
                            };
                            group.sets.push(set);
                        }
                        None => steps.push(Step::Walk(WalkGroup { prefix, absolute, sets: vec![set], depth })),
                    }
                }
            }
        }

        Ok(steps)
    }

    /// Where a prefix lives on disk. Absolute prefixes sit under `root`.
    fn base_path(&self, prefix: &str, absolute: bool) -> PathBuf {
        if absolute {
            return match &self.opts.root {
                Some(root) => root.join(prefix.trim_start_matches('/')),
                None => PathBuf::from(prefix),
            };
        }
        if prefix.is_empty() {
            return PathBuf::from(&self.state.cwd);
        }
        Path::new(&self.state.cwd).join(prefix)
    }

    /// How a prefix is written in reported paths.
    fn reported_prefix(&self, prefix: &str, absolute: bool) -> String {
        match (absolute, &self.opts.root) {
            (true, Some(_)) => to_slash(self.base_path(prefix, absolute)),
            _ => prefix.to_string(),
        }
    }

    fn literal(&self, path: &str, dir_only: bool, ignore: &IgnoreSet, found: &mut Found) -> Result<(), Halt> {
        let absolute = path.starts_with('/');
        let fs_path = self.base_path(path, absolute);
        let reported = self.reported_prefix(path, absolute);
        if ignore.is_ignored(&reported) {
            return Ok(());
        }

        let abs = make_abs(&self.abs, &reported);
        let cached = self.state.stat_cache.read().get(&abs).cloned();
        if let Some(stat) = cached {
            // Satisfied from cache: listed at the end, never sent on its own.
            let is_dir = stat.is_dir();
            if (dir_only && !is_dir) || (self.opts.nodir && is_dir) {
                return Ok(());
            }
            let reported = self.decorate(reported, abs, is_dir, dir_only);
            trace!(path = %reported, "cached match");
            found.record(reported);
            return Ok(());
        }

        match fs::symlink_metadata(&fs_path) {
            Ok(_) => self.emit(reported, &fs_path, dir_only, found),
            Err(e) => self.absent_or_fail(fs_path, e),
        }
    }

    fn walk(&self, group: &WalkGroup, ignore: &IgnoreSet, found: &mut Found) -> Result<(), Halt> {
        let base = self.base_path(&group.prefix, group.absolute);
        if let Err(e) = fs::symlink_metadata(&base) {
            return self.absent_or_fail(base, e);
        }
        let prefix = self.reported_prefix(&group.prefix, group.absolute);
        let mopts = match_options(self.opts.dot, self.opts.nocase);

        let mut builder = WalkBuilder::new(&base);
        builder
            .standard_filters(false)
            .ignore(false)
            .parents(false)
            .hidden(false)
            .follow_links(self.opts.follow)
            .same_file_system(false)
            .max_depth(group.depth)
            .sort_by_file_name(|a, b| a.cmp(b));

        if !ignore.prune.is_empty() {
            let prune = Arc::clone(&ignore.prune);
            let popts = ignore.opts;
            let base = base.clone();
            let prefix = prefix.clone();
            builder.filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let reported = join(&prefix, &relative(&base, entry.path()));
                !prune.iter().any(|p| p.matches_with(&reported, popts))
            });
        }

        for result in builder.build() {
            if self.abort.is_cancelled() {
                return Err(Halt::Aborted);
            }

            let entry = match result {
                Ok(e) => e,
                Err(e) => {
                    self.skip_or_fail(map_walk_error(e))?;
                    continue;
                }
            };

            let at_base = entry.depth() == 0;
            if at_base && !group.sets.iter().any(|s| s.matches_base) {
                continue;
            }

            let rel = relative(&base, entry.path());
            let reported = join(&prefix, &rel);
            if reported.is_empty() || ignore.is_ignored(&reported) {
                continue;
            }

            for set in &group.sets {
                let hit = if at_base { set.matches_base } else { set.remainder.matches_with(&rel, mopts) };
                if hit {
                    self.emit(reported.clone(), entry.path(), set.dir_only, found)?;
                }
            }
        }

        Ok(())
    }

    /// Report one live match.
    fn emit(&self, path: String, fs_path: &Path, dir_only: bool, found: &mut Found) -> Result<(), Halt> {
        let needs_kind = dir_only || self.opts.nodir || self.opts.mark;
        let is_dir = needs_kind && fs::metadata(fs_path).map(|m| m.is_dir()).unwrap_or(false);
        if (dir_only && !is_dir) || (self.opts.nodir && is_dir) {
            return Ok(());
        }

        let abs = make_abs(&self.abs, &path);
        if self.opts.stat {
            self.cache_stat(&abs, fs_path);
        }

        let reported = self.decorate(path, abs, is_dir, dir_only);
        trace!(path = %reported, "match");
        self.events.send(SourceEvent::Match(reported.clone())).map_err(|_| Halt::Aborted)?;
        found.record(reported);
        Ok(())
    }

    /// Apply `absolute` and `mark` to a reported path. Patterns ending in `/`
    /// keep their slash.
    fn decorate(&self, path: String, abs: String, is_dir: bool, dir_only: bool) -> String {
        let mut reported = if self.opts.absolute { abs } else { path };
        if (dir_only || (self.opts.mark && is_dir)) && !reported.ends_with('/') {
            reported.push('/');
        }
        reported
    }

    fn cache_stat(&self, abs: &str, fs_path: &Path) {
        if self.state.stat_cache.read().contains_key(abs) {
            return;
        }
        let meta = fs::metadata(fs_path).or_else(|_| fs::symlink_metadata(fs_path));
        if let Ok(meta) = meta {
            self.state.stat_cache.write().insert(abs.to_string(), FileStat::from_metadata(&meta));
        }
    }

    /// A path that isn't there is no match; anything else failed to read.
    fn absent_or_fail(&self, path: PathBuf, e: io::Error) -> Result<(), Halt> {
        if is_absent(&e) {
            return Ok(());
        }
        self.skip_or_fail(io_at(path, e))
    }

    fn skip_or_fail(&self, err: GlobError) -> Result<(), Halt> {
        if self.opts.strict.unwrap_or(false) {
            return Err(Halt::Failed(err));
        }
        if !self.opts.silent.unwrap_or(false) {
            warn!(error = %err, "skipping unreadable entry");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ignore patterns
// ---------------------------------------------------------------------------

struct IgnoreSet {
    patterns: Vec<Pattern>,
    /// Directories whose whole subtree is ignored (`dir/**`).
    prune: Arc<Vec<Pattern>>,
    opts: MatchOptions,
}

impl IgnoreSet {
    fn compile(ignore: &[String], nocase: bool) -> Result<Self, GlobError> {
        let mut patterns = Vec::new();
        let mut prune = Vec::new();

        for raw in ignore {
            for expanded in expand_braces(raw) {
                let text = expanded.trim_start_matches("./");
                patterns.push(compile_ignore(raw, text)?);
                if let Some(dir) = text.strip_suffix("/**") {
                    prune.push(compile_ignore(raw, dir)?);
                }
            }
        }

        Ok(Self { patterns, prune: Arc::new(prune), opts: match_options(true, nocase) })
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.patterns.iter().chain(self.prune.iter()).any(|p| p.matches_with(path, self.opts))
    }
}

fn compile_ignore(raw: &str, text: &str) -> Result<Pattern, GlobError> {
    Pattern::new(text).map_err(|e| GlobError::InvalidGlob { pattern: raw.to_string(), message: e.msg.to_string() })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn relative(base: &Path, path: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) => to_slash(rel),
        Err(_) => to_slash(path),
    }
}

/// Missing paths, non-directory parents, link loops and overlong names just
/// mean "no match".
fn is_absent(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound
        || matches!(e.raw_os_error(), Some(code) if code == 20 || code == LOOP_ERRNO || code == NAME_TOO_LONG_ERRNO)
}

fn io_at(path: PathBuf, e: io::Error) -> GlobError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        GlobError::PermissionDenied(path)
    } else {
        GlobError::Io { path, source: e }
    }
}

fn map_walk_error(e: ignore::Error) -> GlobError {
    match e {
        ignore::Error::WithPath { path, err } => match *err {
            ignore::Error::Io(io_err) => io_at(path, io_err),
            other => GlobError::Source(format!("{}: {other}", path.display())),
        },
        ignore::Error::WithDepth { err, .. } => map_walk_error(*err),
        ignore::Error::Loop { child, .. } => GlobError::SymlinkLoop(child),
        ignore::Error::Io(io_err) => io_at(PathBuf::new(), io_err),
        other => GlobError::Source(other.to_string()),
    }
}
