use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::entry::FileStat;
use crate::error::{GlobError, RealpathError};
use crate::options::Options;

/// Absolute path → stat info, shared between a source run and its subscription.
pub type StatCache = Arc<RwLock<HashMap<String, FileStat>>>;

/// Path → canonical path, shared between a source run and the resolvers.
pub type RealpathCache = Arc<RwLock<HashMap<String, String>>>;

/// Everything a match source pushes to a subscription.
#[derive(Debug)]
pub enum SourceEvent {
    /// One discovered path. The same path may arrive more than once.
    Match(String),

    /// The run failed. Nothing follows.
    Error(GlobError),

    /// The run finished. Carries every match of the run, including ones that
    /// were satisfied from a cache and never sent as [`SourceEvent::Match`].
    End(Vec<String>),
}

/// State a source exposes while it runs.
#[derive(Debug, Default)]
pub struct SourceState {
    /// Absolute, `/`-separated working directory.
    pub cwd: String,

    /// Whether `cwd` differs from the process working directory.
    pub changed_cwd: bool,

    pub stat_cache: StatCache,
    pub realpath_cache: RealpathCache,
}

/// A started source run: its state plus the means to stop it.
pub struct SourceRun {
    pub state: Arc<SourceState>,
    abort: CancellationToken,
    abort_delay: Duration,
}

impl SourceRun {
    /// Default delay between an unsubscribe and the abort request.
    ///
    /// Aborting while a matcher is still tearing down its internal listeners
    /// can race; waiting a few milliseconds lets that settle.
    pub const ABORT_DELAY: Duration = Duration::from_millis(4);

    pub fn new(state: Arc<SourceState>, abort: CancellationToken) -> Self {
        Self { state, abort, abort_delay: Self::ABORT_DELAY }
    }

    /// Override the abort delay. Only sources proven free of the teardown
    /// race should go below [`SourceRun::ABORT_DELAY`].
    pub fn with_abort_delay(mut self, delay: Duration) -> Self {
        self.abort_delay = delay;
        self
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn abort_delay(&self) -> Duration {
        self.abort_delay
    }
}

/// Something that discovers paths matching a pattern and pushes them as
/// [`SourceEvent`]s.
///
/// # Contract
///
/// - `start` returns promptly; discovery happens in the background and is
///   reported through `events`.
/// - After [`SourceEvent::Error`] or [`SourceEvent::End`], nothing more is sent.
/// - Once the run's abort token is cancelled the source stops sending and
///   never sends `End`.
/// - `Err` from `start` is delivered through the subscription's stream.
pub trait MatchSource: Send + Sync {
    fn start(
        &self,
        pattern: &str,
        options: &Options,
        events: UnboundedSender<SourceEvent>,
    ) -> Result<SourceRun, GlobError>;
}

/// Canonical-path lookup for a single path.
///
/// Implementations may read and populate `cache`. Failures are tagged with
/// the call that failed; a [`Syscall::Stat`](crate::Syscall::Stat) failure
/// marks an unreachable symlink target.
pub trait RealpathResolver: Send + Sync {
    fn resolve(&self, path: String, cache: RealpathCache) -> BoxFuture<'static, Result<String, RealpathError>>;
}
