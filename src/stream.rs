use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::GlobSource;
use crate::entry::{FileStat, Match};
use crate::error::{GlobError, RealpathError};
use crate::input::{OptionsInput, PatternInput};
use crate::options::Options;
use crate::path::{make_abs, AbsContext};
use crate::realpath::{CachedRealpath, FsRealpath};
use crate::traits::{MatchSource, RealpathResolver, SourceEvent, SourceRun, SourceState};

// ---------------------------------------------------------------------------
// GlobStream
// ---------------------------------------------------------------------------

/// A lazy, restartable stream of glob matches.
///
/// Created via [`globstream::glob_stream()`](crate::glob_stream). Building one
/// does no I/O; every [`subscribe()`](GlobStream::subscribe) validates the
/// inputs and starts a fresh, independent run.
///
/// # Example
///
/// ```rust,no_run
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), globstream::GlobError> {
/// let mut matches = globstream::glob_stream("src/**/*.rs")
///     .with_options(globstream::Options::default().realpath(true))
///     .subscribe()?;
///
/// while let Some(m) = matches.next().await {
///     println!("{}", m?.path);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GlobStream {
    pattern: PatternInput,
    options: Option<OptionsInput>,
    source: Arc<dyn MatchSource>,
    resolvers: Resolvers,
}

#[derive(Clone)]
struct Resolvers {
    plain: Arc<dyn RealpathResolver>,
    cached: Arc<dyn RealpathResolver>,
}

impl GlobStream {
    pub fn new(pattern: impl Into<PatternInput>) -> Self {
        Self {
            pattern: pattern.into(),
            options: None,
            source: Arc::new(GlobSource),
            resolvers: Resolvers { plain: Arc::new(FsRealpath), cached: Arc::new(CachedRealpath) },
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────

    /// Set the options. Accepts typed [`Options`] or a JSON value; either is
    /// validated at subscribe time.
    pub fn with_options(mut self, options: impl Into<OptionsInput>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Replace the default filesystem [`GlobSource`].
    pub fn with_source(mut self, source: impl MatchSource + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    /// Replace the realpath resolvers. `cached` is used when the
    /// `realpathCache` option is non-empty, `plain` otherwise.
    pub fn with_resolvers(
        mut self,
        plain: impl RealpathResolver + 'static,
        cached: impl RealpathResolver + 'static,
    ) -> Self {
        self.resolvers = Resolvers { plain: Arc::new(plain), cached: Arc::new(cached) };
        self
    }

    // ── Subscribe ─────────────────────────────────────────────────────────

    /// Validate the inputs and start matching.
    ///
    /// # Errors
    ///
    /// Returns validation errors only (see [`GlobError::is_validation`]).
    /// Everything that goes wrong once matching has started arrives through
    /// the returned [`Subscription`].
    pub fn subscribe(&self) -> Result<Subscription, GlobError> {
        let (pattern, options) = self.validate()?;
        Ok(self.start(pattern, options))
    }

    pub(crate) fn validate(&self) -> Result<(String, Options), GlobError> {
        let pattern = self.pattern.validate()?;
        let options = match &self.options {
            Some(input) => input.validate()?,
            None => Options::default(),
        };
        Ok((pattern, options))
    }

    /// Start a run for inputs that already passed [`validate`](Self::validate).
    pub(crate) fn start(&self, pattern: String, options: Options) -> Subscription {
        let resolver = if options.realpath_cache.is_empty() {
            Arc::clone(&self.resolvers.plain)
        } else {
            Arc::clone(&self.resolvers.cached)
        };

        debug!(pattern = %pattern, realpath = options.realpath, unique = !options.nounique, "subscribing");

        let (tx, rx) = mpsc::unbounded_channel();
        let run = self.source.start(&pattern, &options.for_source(), tx);
        Subscription::new(pattern, &options, run, rx, resolver)
    }

    /// Subscribe and gather every match, stopping at the first error.
    pub async fn collect(&self) -> Result<Vec<Match>, GlobError> {
        let mut subscription = self.subscribe()?;
        let mut matches = Vec::new();
        while let Some(item) = subscription.next().await {
            matches.push(item?);
        }
        Ok(matches)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

type Resolution = BoxFuture<'static, (String, Result<String, RealpathError>)>;

/// One run of a [`GlobStream`].
///
/// Yields `Ok(Match)` zero or more times, then either ends (`None`) or yields
/// a single `Err` and ends. Dropping it, or calling
/// [`unsubscribe()`](Subscription::unsubscribe), cancels the run.
///
/// All per-run state (dedup sets, in-flight resolutions, the end flag) lives
/// here and is only touched from `poll_next`.
pub struct Subscription {
    pattern: String,
    run: Option<SourceRun>,
    state: Arc<SourceState>,
    events: Option<UnboundedReceiver<SourceEvent>>,
    resolver: Arc<dyn RealpathResolver>,
    abs: AbsContext,

    realpath: bool,
    unique: bool,
    stat: bool,
    absolute: bool,

    /// Raw matches already handled (emitted, or sent for resolution).
    seen_raw: HashSet<String>,
    /// Canonical paths already emitted.
    seen_resolved: HashSet<String>,
    /// In-flight resolutions; its length is the pending counter.
    pending: FuturesUnordered<Resolution>,
    /// The source sent its end event.
    ended: bool,

    ready: VecDeque<Result<Match, GlobError>>,
    closed: bool,
}

impl Subscription {
    fn new(
        pattern: String,
        options: &Options,
        run: Result<SourceRun, GlobError>,
        events: UnboundedReceiver<SourceEvent>,
        resolver: Arc<dyn RealpathResolver>,
    ) -> Self {
        let (run, state, ready) = match run {
            Ok(run) => {
                let state = Arc::clone(&run.state);
                (Some(run), state, VecDeque::new())
            }
            Err(e) => (None, Arc::new(SourceState::default()), VecDeque::from([Err(e)])),
        };

        Self {
            pattern,
            run,
            // `root` stays empty: reported paths are already rooted by the source.
            abs: AbsContext::new(state.cwd.clone()),
            state,
            events: Some(events),
            resolver,
            realpath: options.realpath,
            unique: !options.nounique,
            stat: options.stat,
            absolute: options.absolute,
            seen_raw: HashSet::new(),
            seen_resolved: HashSet::new(),
            pending: FuturesUnordered::new(),
            ended: false,
            ready,
            closed: false,
        }
    }

    /// The absolute working directory of this run.
    pub fn cwd(&self) -> &str {
        &self.state.cwd
    }

    /// Whether the run has completed, failed, or been unsubscribed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of realpath resolutions in flight.
    pub fn pending_resolutions(&self) -> usize {
        self.pending.len()
    }

    /// Stop the run. A no-op once the run has finished.
    ///
    /// Nothing is yielded afterwards. The source is told to abort after its
    /// [`abort_delay`](SourceRun::abort_delay) unless it already ended.
    pub fn unsubscribe(&mut self) {
        if !self.closed {
            debug!(pattern = %self.pattern, ended = self.ended, "unsubscribed");
            self.close();
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.ready.clear();
        self.pending = FuturesUnordered::new();

        let events = self.events.take();
        if let Some(run) = &self.run {
            if !self.ended {
                schedule_abort(run.abort_token(), run.abort_delay(), events);
            }
        }
    }

    // ── Event handling ────────────────────────────────────────────────────

    fn on_match(&mut self, raw: String) {
        let fresh = self.seen_raw.insert(raw.clone());
        if self.unique && !fresh {
            return;
        }

        if self.realpath {
            let target = make_abs(&self.abs, &raw);
            trace!(raw = %raw, "resolving");
            let resolution = self
                .resolver
                .resolve(target, Arc::clone(&self.state.realpath_cache))
                .map(move |outcome| (raw, outcome))
                .boxed();
            self.pending.push(resolution);
            return;
        }

        let stat = self.stat_for(&make_abs(&self.abs, &raw), None);
        self.push(raw, stat);
    }

    fn on_resolved(&mut self, raw: String, outcome: Result<String, RealpathError>) {
        let resolved = match outcome {
            Ok(path) => make_abs(&self.abs, &path),
            Err(e) if e.is_stat() => {
                trace!(raw = %raw, error = %e, "unreachable symlink target, keeping raw path");
                self.abs_if_needed(&raw)
            }
            Err(e) => {
                self.ready.push_back(Err(e.into()));
                return;
            }
        };

        let fresh = self.seen_resolved.insert(resolved.clone());
        if self.unique && !fresh {
            return;
        }

        let stat = self.stat_for(&resolved, Some(&raw));
        self.push(resolved, stat);
    }

    fn on_end(&mut self, all: Vec<String>) {
        debug!(pattern = %self.pattern, total = all.len(), pending = self.pending.len(), "source ended");
        self.ended = true;
        // Matches satisfied from the source's own cache never arrived on their own.
        for raw in all {
            if !self.seen_raw.contains(&raw) {
                self.on_match(raw);
            }
        }
    }

    fn push(&mut self, path: String, stat: Option<FileStat>) {
        trace!(path = %path, "next");
        self.ready.push_back(Ok(Match { cwd: self.state.cwd.clone(), path, stat }));
    }

    fn abs_if_needed(&self, path: &str) -> String {
        if self.absolute {
            path.to_string()
        } else {
            make_abs(&self.abs, path)
        }
    }

    /// Look up `key` in the source's stat cache, then the raw path's absolute
    /// form when given.
    fn stat_for(&self, key: &str, raw: Option<&str>) -> Option<FileStat> {
        if !self.stat {
            return None;
        }
        let cache = self.state.stat_cache.read();
        cache
            .get(key)
            .or_else(|| raw.and_then(|r| cache.get(&make_abs(&self.abs, r))))
            .cloned()
    }
}

impl Stream for Subscription {
    type Item = Result<Match, GlobError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.closed {
                return Poll::Ready(None);
            }

            if let Some(item) = this.ready.pop_front() {
                if let Err(e) = &item {
                    debug!(pattern = %this.pattern, error = %e, "subscription failed");
                    this.close();
                }
                return Poll::Ready(Some(item));
            }

            if this.ended && this.pending.is_empty() {
                debug!(pattern = %this.pattern, "subscription complete");
                this.close();
                return Poll::Ready(None);
            }

            if !this.pending.is_empty() {
                if let Poll::Ready(Some((raw, outcome))) = this.pending.poll_next_unpin(cx) {
                    this.on_resolved(raw, outcome);
                    continue;
                }
            }

            if !this.ended {
                let Some(events) = this.events.as_mut() else {
                    return Poll::Ready(None);
                };
                match events.poll_recv(cx) {
                    Poll::Ready(Some(SourceEvent::Match(raw))) => this.on_match(raw),
                    Poll::Ready(Some(SourceEvent::Error(e))) => this.ready.push_back(Err(e)),
                    Poll::Ready(Some(SourceEvent::End(all))) => this.on_end(all),
                    Poll::Ready(None) => this
                        .ready
                        .push_back(Err(GlobError::Source("match source stopped without ending".into()))),
                    Poll::Pending => return Poll::Pending,
                }
                continue;
            }

            return Poll::Pending;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ask the source to stop after `delay`. The event receiver is kept alive
/// until then so the source isn't cut off early through a closed channel.
fn schedule_abort(token: CancellationToken, delay: Duration, events: Option<UnboundedReceiver<SourceEvent>>) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                token.cancel();
                drop(events);
            });
        }
        Err(_) => token.cancel(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    use crate::entry::EntryKind;
    use crate::error::Syscall;
    use crate::traits::RealpathCache;

    /// Sends a fixed script of events as soon as it starts.
    struct ScriptedSource {
        script: Mutex<Vec<Vec<SourceEvent>>>,
        stats: HashMap<String, FileStat>,
        aborts: Arc<Mutex<Vec<CancellationToken>>>,
        abort_delay: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(runs: Vec<Vec<SourceEvent>>) -> Self {
            Self { script: Mutex::new(runs), stats: HashMap::new(), aborts: Arc::default(), abort_delay: None }
        }
    }

    impl MatchSource for ScriptedSource {
        fn start(
            &self,
            _pattern: &str,
            options: &Options,
            events: mpsc::UnboundedSender<SourceEvent>,
        ) -> Result<SourceRun, GlobError> {
            assert!(!options.realpath, "the source must never resolve realpaths itself");
            let mut script = self.script.lock().unwrap();
            for event in script.remove(0) {
                let _ = events.send(event);
            }
            let state = SourceState {
                cwd: "/work".into(),
                changed_cwd: true,
                stat_cache: Arc::new(parking_lot::RwLock::new(self.stats.clone())),
                realpath_cache: Arc::default(),
            };
            let abort = CancellationToken::new();
            self.aborts.lock().unwrap().push(abort.clone());
            let run = SourceRun::new(Arc::new(state), abort);
            Ok(match self.abort_delay {
                Some(delay) => run.with_abort_delay(delay),
                None => run,
            })
        }
    }

    /// Resolves from a fixed table after a short sleep; misses fail with the
    /// configured syscall.
    struct TableResolver {
        table: HashMap<&'static str, &'static str>,
        miss: Syscall,
    }

    impl RealpathResolver for TableResolver {
        fn resolve(&self, path: String, _cache: RealpathCache) -> BoxFuture<'static, Result<String, RealpathError>> {
            let hit = self.table.get(path.as_str()).map(|s| s.to_string());
            let miss = self.miss;
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                hit.ok_or_else(|| RealpathError::new(miss, path, io::Error::from(io::ErrorKind::NotFound)))
            }
            .boxed()
        }
    }

    fn stream(runs: Vec<Vec<SourceEvent>>) -> GlobStream {
        GlobStream::new("*").with_source(ScriptedSource::new(runs))
    }

    fn matched(s: &str) -> SourceEvent {
        SourceEvent::Match(s.into())
    }

    fn end(all: &[&str]) -> SourceEvent {
        SourceEvent::End(all.iter().map(|s| s.to_string()).collect())
    }

    fn paths(matches: &[Match]) -> Vec<&str> {
        matches.iter().map(|m| m.path.as_str()).collect()
    }

    #[tokio::test]
    async fn dedups_raw_matches_and_reconciles_end_list() {
        let s = stream(vec![vec![matched("a"), matched("a"), matched("b"), end(&["a", "b", "c"])]]);
        let out = s.collect().await.unwrap();
        assert_eq!(paths(&out), ["a", "b", "c"]);
        assert!(out.iter().all(|m| m.cwd == "/work" && m.stat.is_none()));
    }

    #[tokio::test]
    async fn nounique_keeps_live_repeats_without_replaying_end() {
        let s = stream(vec![vec![matched("a"), matched("a"), end(&["a", "a"])]])
            .with_options(Options::default().nounique(true));
        let out = s.collect().await.unwrap();
        assert_eq!(paths(&out), ["a", "a"]);
    }

    #[tokio::test]
    async fn empty_run_completes_without_items() {
        let mut sub = stream(vec![vec![end(&[])]]).subscribe().unwrap();
        assert!(sub.next().await.is_none());
        assert!(sub.is_closed());
    }

    #[tokio::test]
    async fn source_error_ends_the_stream() {
        let s = stream(vec![vec![
            matched("a"),
            SourceEvent::Error(GlobError::Source("boom".into())),
            matched("late"),
            end(&["a", "late"]),
        ]]);
        let mut sub = s.subscribe().unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().path, "a");
        assert!(matches!(sub.next().await, Some(Err(GlobError::Source(_)))));
        assert!(sub.next().await.is_none());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn each_subscription_restarts_from_scratch() {
        let s = stream(vec![vec![matched("a"), end(&["a"])], vec![matched("a"), end(&["a"])]]);
        assert_eq!(paths(&s.collect().await.unwrap()), ["a"]);
        assert_eq!(paths(&s.collect().await.unwrap()), ["a"]);
    }

    #[tokio::test]
    async fn stat_is_attached_by_absolute_path() {
        let stat = FileStat { kind: EntryKind::File, size: 3, mode: 0, modified: None };
        let mut source = ScriptedSource::new(vec![vec![matched("a"), end(&["a"])]]);
        source.stats.insert("/work/a".into(), stat.clone());

        let out = GlobStream::new("*")
            .with_source(source)
            .with_options(Options::default().stat(true))
            .collect()
            .await
            .unwrap();
        assert_eq!(out[0].stat, Some(stat));
    }

    #[tokio::test]
    async fn realpath_dedups_resolved_identities_and_defers_completion() {
        let resolver = TableResolver {
            table: HashMap::from([("/work/link", "/work/target"), ("/work/target", "/work/target")]),
            miss: Syscall::Stat,
        };
        let s = stream(vec![vec![matched("link"), end(&["link", "target", "dangling"])]])
            .with_options(Options::default().realpath(true))
            .with_resolvers(resolver, FsRealpath);

        let mut out = s.collect().await.unwrap();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(paths(&out), ["/work/dangling", "/work/target"]);
    }

    #[tokio::test]
    async fn realpath_failure_other_than_stat_is_an_error() {
        let resolver = TableResolver { table: HashMap::new(), miss: Syscall::Lstat };
        let s = stream(vec![vec![end(&["missing"])]])
            .with_options(Options::default().realpath(true))
            .with_resolvers(resolver, FsRealpath);

        let err = s.collect().await.unwrap_err();
        assert_eq!(err.code(), Some("ENOENT"));
        assert!(matches!(err, GlobError::Realpath(ref e) if e.syscall == Syscall::Lstat));
    }

    #[tokio::test]
    async fn seeded_realpath_cache_selects_cached_resolver() {
        let plain = TableResolver { table: HashMap::new(), miss: Syscall::Lstat };
        let cached = TableResolver { table: HashMap::from([("/work/a", "/real/a")]), miss: Syscall::Lstat };
        let s = stream(vec![vec![matched("a"), end(&["a"])]])
            .with_options(Options::default().realpath(true).realpath_cache_entry("/elsewhere", "/x"))
            .with_resolvers(plain, cached);

        assert_eq!(paths(&s.collect().await.unwrap()), ["/real/a"]);
    }

    #[tokio::test]
    async fn unsubscribe_aborts_after_delay() {
        let source = ScriptedSource::new(vec![vec![matched("a")]]);
        let aborts = Arc::clone(&source.aborts);
        let mut sub = GlobStream::new("*").with_source(source).subscribe().unwrap();

        assert_eq!(sub.next().await.unwrap().unwrap().path, "a");
        sub.unsubscribe();
        assert!(sub.next().await.is_none());

        let token = aborts.lock().unwrap()[0].clone();
        assert!(!token.is_cancelled(), "abort must be deferred");
        tokio::time::sleep(SourceRun::ABORT_DELAY * 5).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sources_may_set_their_own_abort_delay() {
        let mut source = ScriptedSource::new(vec![vec![matched("a")]]);
        source.abort_delay = Some(Duration::from_millis(60));
        let aborts = Arc::clone(&source.aborts);
        let mut sub = GlobStream::new("*").with_source(source).subscribe().unwrap();
        sub.unsubscribe();

        let token = aborts.lock().unwrap()[0].clone();
        tokio::time::sleep(SourceRun::ABORT_DELAY * 5).await;
        assert!(!token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(token.is_cancelled());
    }

    fn identity_resolver() -> TableResolver {
        TableResolver {
            table: HashMap::from([("/work/a", "/work/a"), ("/work/b", "/work/b"), ("/work/c", "/work/c")]),
            miss: Syscall::Stat,
        }
    }

    #[tokio::test]
    async fn unsubscribe_drops_resolutions_in_flight() {
        let mut sub = stream(vec![vec![matched("a"), matched("b"), matched("c"), end(&["a", "b", "c"])]])
            .with_options(Options::default().realpath(true))
            .with_resolvers(identity_resolver(), FsRealpath)
            .subscribe()
            .unwrap();
        assert_eq!(sub.cwd(), "/work");

        assert!(futures::poll!(sub.next()).is_pending());
        assert_eq!(sub.pending_resolutions(), 3);

        sub.unsubscribe();
        assert_eq!(sub.pending_resolutions(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sub.next().await.is_none());
    }

    #[derive(Default)]
    struct Tally {
        next: usize,
        complete: bool,
    }

    struct Counter(Arc<Mutex<Tally>>);

    impl crate::observer::Observer for Counter {
        fn next(&mut self, _item: Match) {
            self.0.lock().unwrap().next += 1;
        }

        fn complete(&mut self) {
            self.0.lock().unwrap().complete = true;
        }
    }

    #[tokio::test]
    async fn observers_hear_nothing_after_unsubscribing_mid_resolution() {
        let tally = Arc::new(Mutex::new(Tally::default()));
        let handle = stream(vec![vec![matched("a"), matched("b"), matched("c"), end(&["a", "b", "c"])]])
            .with_options(Options::default().realpath(true))
            .with_resolvers(identity_resolver(), FsRealpath)
            .subscribe_with(Counter(Arc::clone(&tally)))
            .unwrap();

        // Let the driver take in the events and start resolving.
        tokio::task::yield_now().await;
        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let tally = tally.lock().unwrap();
        assert_eq!(tally.next, 0);
        assert!(!tally.complete);
    }

    #[tokio::test]
    async fn finished_runs_are_never_aborted() {
        let source = ScriptedSource::new(vec![vec![end(&[])]]);
        let aborts = Arc::clone(&source.aborts);
        let mut sub = GlobStream::new("*").with_source(source).subscribe().unwrap();
        assert!(sub.next().await.is_none());
        drop(sub);

        tokio::time::sleep(SourceRun::ABORT_DELAY * 5).await;
        assert!(!aborts.lock().unwrap()[0].is_cancelled());
    }

    #[test]
    fn validation_errors_are_returned_from_subscribe() {
        let err = GlobStream::new(&b"hi"[..]).subscribe().err().unwrap();
        assert_eq!(err.to_string(), "Expected a glob pattern string, but got <Buffer 68 69>.");

        let err = GlobStream::new("*.yml").with_options(serde_json::json!([1, 2])).subscribe().err().unwrap();
        assert!(err.is_validation());
    }
}
