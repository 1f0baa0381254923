//! Caller context carrying cancellation and an optional deadline

use crate::errors::{PoolError, PoolResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellable context passed to [`ResourcePool::get`](crate::ResourcePool::get)
/// and on to the resource factory.
///
/// Cloning a context shares its cancellation token, so cancelling any clone
/// cancels them all.
///
/// # Examples
///
/// ```
/// use shutdown_pool::Context;
/// use std::time::Duration;
///
/// let ctx = Context::background().with_timeout(Duration::from_secs(5));
/// assert!(ctx.deadline().is_some());
///
/// ctx.cancel();
/// assert!(ctx.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Expire the context `timeout` from now.
    ///
    /// An earlier deadline already set on the context is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire the context at `deadline`. An earlier deadline is kept.
    pub fn with_deadline(mut self, deadline: impl Into<Instant>) -> Self {
        let deadline = deadline.into();
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Replace the cancellation token with the provided one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Derive a context that is cancelled with its parent but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The reason the context is done, if it is.
    pub fn err(&self) -> Option<PoolError> {
        if self.cancellation.is_cancelled() {
            return Some(PoolError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(PoolError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> PoolError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancellation.cancelled() => PoolError::Cancelled,
                () = tokio::time::sleep_until(deadline) => PoolError::DeadlineExceeded,
            },
            None => {
                self.cancellation.cancelled().await;
                PoolError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context finishes first, in which
    /// case `fut` is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> PoolResult<F::Output> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            output = fut => Ok(output),
            err = self.done() => Err(err),
        }
    }
}
