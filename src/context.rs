//! Cooperative cancellation for readiness waits
//!
//! A [`Context`] is a cancellation token with an optional deadline. Cloning
//! shares the token; deriving with [`Context::with_cancel`] or
//! [`Context::with_timeout`] creates a child that is cancelled with its parent
//! but can also be cancelled on its own.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Cancelled {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled unless asked to
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context that expires after `timeout`, or earlier if the parent does
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check; explicit cancellation wins over an expired deadline
    pub fn err(&self) -> Option<Cancelled> {
        if self.token.is_cancelled() {
            Some(Cancelled::Canceled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Cancelled::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> Cancelled {
        if let Some(reason) = self.err() {
            return reason;
        }
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Cancelled::Canceled,
                _ = tokio::time::sleep_until(deadline) => Cancelled::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Cancelled::Canceled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_live() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel() {
        let ctx = Context::background();
        ctx.cancel();
        assert_eq!(ctx.err(), Some(Cancelled::Canceled));
        assert_eq!(ctx.done().await, Cancelled::Canceled);
        assert_eq!(Cancelled::Canceled.to_string(), "context canceled");
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();
        assert_eq!(parent.err(), None);

        let child = parent.with_cancel();
        parent.cancel();
        assert_eq!(child.err(), Some(Cancelled::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.done().await, Cancelled::DeadlineExceeded);
        assert_eq!(
            ctx.err().map(|c| c.to_string()).as_deref(),
            Some("context deadline exceeded")
        );
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
