//! Cancellation and deadline propagation for blocking pool operations.
//!
//! A [`CallContext`] is handed to every call that may wait: acquiring a
//! sandbox, provisioning, executing code. The call races its work against
//! [`CallContext::done`] and returns as soon as either resolves.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    /// The context (or an ancestor) was cancelled explicitly.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

/// A cancellation token paired with an optional deadline.
///
/// Children inherit their parent's cancellation and never outlive its deadline;
/// cancelling a child leaves the parent untouched.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A root context with no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A root context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// A child sharing this context's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// A child whose deadline is the earlier of the parent's and `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The instant after which this context is done, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<DoneReason> {
        if self.token.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(DoneReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => DoneReason::Cancelled,
                () = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_live_until_cancelled() {
        let ctx = CallContext::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());

        ctx.cancel();
        assert_eq!(ctx.err(), Some(DoneReason::Cancelled));
        assert_eq!(ctx.done().await, DoneReason::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_expires() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        assert_eq!(ctx.done().await, DoneReason::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(DoneReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_inherits_parent_cancellation() {
        let parent = CallContext::background();
        let child = parent.child_with_timeout(Duration::from_secs(60));

        parent.cancel();
        assert_eq!(child.done().await, DoneReason::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelling_child_leaves_parent_live() {
        let parent = CallContext::background();
        let child = parent.child();

        child.cancel();
        assert_eq!(child.err(), Some(DoneReason::Cancelled));
        assert!(parent.err().is_none());
    }

    #[tokio::test]
    async fn test_child_never_extends_parent_deadline() {
        let parent = CallContext::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.child_with_timeout(Duration::from_millis(1));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[test]
    fn test_done_reason_display() {
        assert_eq!(DoneReason::Cancelled.to_string(), "context cancelled");
        assert_eq!(
            DoneReason::DeadlineExceeded.to_string(),
            "context deadline exceeded"
        );
    }
}
