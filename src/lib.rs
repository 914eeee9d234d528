//! # globstream
//!
//! Lazy, cancellable streams of glob matches.
//!
//! [`glob_stream()`] returns a [`GlobStream`]: a description of a match run
//! that does nothing until subscribed. Every subscription starts a fresh run
//! that reports each matching path as a [`Match`], optionally resolved to its
//! canonical path (`realpath`) and carrying stat info (`stat`).
//!
//! The crate owns the subscription semantics: deduplication, realpath
//! resolution, completion ordering and cancellation. Path discovery is
//! pluggable through [`MatchSource`]; the default [`GlobSource`] walks the
//! filesystem with `ignore`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use globstream::{glob_stream, Options};
//!
//! # async fn example() -> Result<(), globstream::GlobError> {
//! let mut matches = glob_stream("{*.toml,src/*.rs}")
//!     .with_options(Options::default().cwd(".").stat(true))
//!     .subscribe()?;
//!
//! while let Some(m) = matches.next().await {
//!     let m = m?;
//!     println!("{} ({} bytes)", m.path, m.stat.map_or(0, |s| s.size));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Callbacks
//!
//! Implement [`Observer`] to be called back instead of polling:
//!
//! ```rust,no_run
//! use globstream::{glob_stream, GlobError, Match, Observer};
//!
//! struct Print;
//!
//! impl Observer for Print {
//!     fn next(&mut self, item: Match) {
//!         println!("{}", item.path);
//!     }
//!
//!     fn error(&mut self, error: GlobError) {
//!         eprintln!("glob failed: {error}");
//!     }
//! }
//!
//! # async fn example() -> Result<(), GlobError> {
//! let handle = glob_stream("**/*.md").subscribe_with(Print)?;
//! handle.closed().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod engine;
pub mod path;

mod entry;
mod error;
mod input;
mod observer;
mod options;
mod pattern;
mod realpath;
mod stream;
mod traits;

// ── Public re-exports ─────────────────────────────────────────────────────────

pub use engine::GlobSource;
pub use entry::{EntryKind, FileStat, Match};
pub use error::{GlobError, RealpathError, Syscall};
pub use input::{OptionsInput, PatternInput};
pub use observer::{Observer, SubscriptionHandle};
pub use options::Options;
pub use realpath::{CachedRealpath, FsRealpath};
pub use stream::{GlobStream, Subscription};
pub use traits::{MatchSource, RealpathCache, RealpathResolver, SourceEvent, SourceRun, SourceState, StatCache};

// ── Entry point ───────────────────────────────────────────────────────────────

/// Create a [`GlobStream`] for `pattern`. No I/O happens until it is
/// subscribed.
///
/// Only text is a valid pattern. Other inputs are accepted here and rejected
/// by [`GlobStream::subscribe`].
///
/// # Example
///
/// ```rust
/// let stream = globstream::glob_stream(&b"*.rs"[..]);
/// let err = stream.subscribe().err().unwrap();
/// assert!(err.is_validation());
/// ```
pub fn glob_stream(pattern: impl Into<PatternInput>) -> GlobStream {
    GlobStream::new(pattern)
}
