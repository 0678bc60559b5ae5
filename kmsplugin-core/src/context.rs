//! Cancellation and deadlines for plugin calls.
//!
//! A [`Context`] never crosses the process boundary. The host turns its deadline into
//! data inside the request, and the plugin rebuilds a fresh `Context` from that data
//! (see [`crate::encoding::context_from_deadline`]).

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Reason a [`Context`] is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled through a [`CancelFunc`].
    #[error("context canceled")]
    Canceled,
    /// The context's deadline has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Carries an optional deadline and cancellation signal for one call.
///
/// Cloning is cheap; clones observe the same cancellation.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<DateTime<Utc>>,
    cancelled: Vec<Arc<AtomicBool>>,
}

/// Cancels the [`Context`] it was created with, and every context derived from it.
#[derive(Clone, Debug)]
pub struct CancelFunc(Arc<AtomicBool>);

impl CancelFunc {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Context {
    /// A context with no deadline that is never cancelled.
    pub fn background() -> Self {
        Context::default()
    }

    /// Derives a context that can be cancelled independently of its parent.
    pub fn with_cancel(&self) -> (Context, CancelFunc) {
        let flag = Arc::new(AtomicBool::new(false));
        let mut cancelled = self.cancelled.clone();
        cancelled.push(flag.clone());
        (
            Context {
                deadline: self.deadline,
                cancelled,
            },
            CancelFunc(flag),
        )
    }

    /// Derives a context that is done at `deadline`, or earlier if the parent's
    /// deadline comes first.
    pub fn with_deadline(&self, deadline: DateTime<Utc>) -> (Context, CancelFunc) {
        let (mut ctx, cancel) = self.with_cancel();
        ctx.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        (ctx, cancel)
    }

    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelFunc) {
        self.with_deadline(Utc::now() + timeout)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Returns the reason this context is done, if it is.
    ///
    /// Cancellation is reported in preference to an expired deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancelled.iter().any(|c| c.load(Ordering::SeqCst)) {
            return Err(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Utc::now() => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
