//! Callback-style subscriptions.
//!
//! [`GlobStream::subscribe_with`] drives a [`Subscription`] on the current
//! tokio runtime and forwards what it yields to an [`Observer`].

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entry::Match;
use crate::error::GlobError;
use crate::stream::GlobStream;

/// Receives the results of one run.
///
/// After `error` or `complete`, nothing else is called. `next` is never
/// called once the run has been unsubscribed.
pub trait Observer: Send + 'static {
    /// Called before matching starts, with the handle that can stop the run.
    fn start(&mut self, _subscription: &SubscriptionHandle) {}

    fn next(&mut self, item: Match);

    fn error(&mut self, _error: GlobError) {}

    fn complete(&mut self) {}
}

/// Controls a run started with [`GlobStream::subscribe_with`].
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    closed: CancellationToken,
}

impl SubscriptionHandle {
    fn new() -> Self {
        Self { closed: CancellationToken::new() }
    }

    /// Stop the run. Safe to call more than once, and after completion.
    pub fn unsubscribe(&self) {
        self.closed.cancel();
    }

    /// Whether the run has completed, failed, or been unsubscribed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the run is closed for any reason.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl GlobStream {
    /// Subscribe with callbacks instead of polling a stream.
    ///
    /// # Errors
    ///
    /// Validation errors, as for [`subscribe`](GlobStream::subscribe), and
    /// [`GlobError::NoRuntime`] when called outside a tokio runtime.
    pub fn subscribe_with<O: Observer>(&self, mut observer: O) -> Result<SubscriptionHandle, GlobError> {
        let (pattern, options) = self.validate()?;
        let runtime = Handle::try_current().map_err(|_| GlobError::NoRuntime)?;
        let mut subscription = self.start(pattern, options);

        let handle = SubscriptionHandle::new();
        observer.start(&handle);
        if handle.is_closed() {
            subscription.unsubscribe();
            return Ok(handle);
        }

        let closed = handle.closed.clone();
        runtime.spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = closed.cancelled() => break,
                    item = subscription.next() => item,
                };

                match item {
                    Some(Ok(m)) => {
                        observer.next(m);
                        if closed.is_cancelled() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        closed.cancel();
                        observer.error(e);
                        break;
                    }
                    None => {
                        closed.cancel();
                        observer.complete();
                        break;
                    }
                }
            }
            debug!(closed = subscription.is_closed(), "observer detached");
            subscription.unsubscribe();
        });

        Ok(handle)
    }
}
