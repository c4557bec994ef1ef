//! Per-call cancellation and deadline.
//!
//! A [`Context`] travels with one call into the retry layer. The layer only
//! suspends between attempts, and that wait ends early, with an error, as
//! soon as the context is cancelled or its deadline passes.
//!
//! ```rust
//! use txretry::Context;
//! use txretry::error::DbError;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cx = Context::background();
//! cx.cancel();
//! assert!(matches!(
//!     cx.sleep(Duration::from_secs(60)).await,
//!     Err(DbError::Cancelled)
//! ));
//! # });
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DbError;

/// Cancellation signal plus optional deadline for one call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled together with `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Derive a context whose deadline is `timeout` from now, or the
    /// current deadline if that is sooner.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with the earlier of `deadline` and the current one.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Derive a context that can be cancelled without cancelling this one.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<DbError> {
        if self.cancel.is_cancelled() {
            Some(DbError::Cancelled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(DbError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Wait for `delay`, returning early with an error if the context is
    /// cancelled or its deadline passes first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), DbError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DbError::Cancelled),
            _ = deadline => Err(DbError::DeadlineExceeded),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
