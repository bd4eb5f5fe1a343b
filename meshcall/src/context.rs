// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Per-call context carrying the caller's deadline and cancellation signal.
//!
//! The context is the sole cancellation vector of a call. Invokers are expected to forward it
//! into their own transport waits; the dispatcher races the invoker against it as well.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::Error;

/// The request context of one call.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

/// Returns a context without a deadline and with a fresh cancellation token.
pub fn current() -> Context {
    Context::default()
}

impl Context {
    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now. A timeout too large to be represented sets none.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Derives a context that is cancelled whenever `self` is, and may be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancellation: self.cancellation.child_token(),
        }
    }

    /// The caller's deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and all children.
    pub fn cancel(&self) {
        self.cancellation.cancel()
    }

    /// Returns true once [`Context::cancel`] was called on this context or a parent.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    /// The deadline effective for a call with the given per-call timeout: the earlier of the
    /// caller's deadline and `now + timeout`. A timeout too large to be represented does not
    /// bound the call.
    pub fn effective_deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        let by_timeout = timeout.and_then(|t| Instant::now().checked_add(t));
        match (self.deadline, by_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fails with [`Error::Canceled`] or [`Error::DeadlineExceeded`] if the call must not start.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::current;
    use crate::Error;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn test_child_follows_parent_cancellation() {
        let parent = current();
        let child = parent.child();
        assert!(child.check().is_ok());
        parent.cancel();
        assert!(child.is_cancelled());
        assert_matches!(child.check(), Err(Error::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_effective_deadline_is_the_earlier_one() {
        let ctx = current().with_timeout(Duration::from_secs(10));
        let deadline = ctx.effective_deadline(Some(Duration::from_secs(1))).unwrap();
        assert!(deadline < ctx.deadline().unwrap());
        assert_eq!(ctx.effective_deadline(None), ctx.deadline());
        assert_eq!(current().effective_deadline(None), None);
    }

    #[test]
    fn test_unrepresentable_timeouts() {
        let ctx = current().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.effective_deadline(Some(Duration::MAX)), None);

        let ctx = current().with_timeout(Duration::from_secs(10));
        assert_eq!(ctx.effective_deadline(Some(Duration::MAX)), ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline() {
        let ctx = current().with_timeout(Duration::from_millis(5));
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_matches!(ctx.check(), Err(Error::DeadlineExceeded));
    }
}
