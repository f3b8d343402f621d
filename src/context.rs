//! Cancellation Context Module
//!
//! Every cache operation takes a [`Context`]: a shared cancellation token plus
//! an optional deadline. Drivers check it before committing side effects and
//! race their I/O against it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, StashError};

// == Cancellation Token ==
/// A clonable token; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every pending waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a concurrent cancel()
            // cannot slip between the check and the await.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// == Context ==
/// Cancellation and deadline signal threaded through driver calls.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context driven by an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Returns a copy of this context that also expires after `timeout`.
    ///
    /// An earlier deadline already on the context is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };

        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    // == Check ==
    /// Returns an error if the context is already cancelled or past its
    /// deadline.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(StashError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StashError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    // == Run ==
    /// Drives `fut` to completion unless the context is cancelled or times out
    /// first, in which case `fut` is dropped.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StashError::Cancelled),
            _ = deadline => Err(StashError::DeadlineExceeded),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_token_clone_shares_state() {
        let token = CancellationToken::new();
        let ctx = Context::with_token(token.clone());

        token.cancel();

        assert!(ctx.token().is_cancelled());
        assert!(matches!(ctx.check(), Err(StashError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = Context::background();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_cancelled_while_pending() {
        let token = CancellationToken::new();
        let ctx = Context::with_token(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(StashError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));

        let result: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StashError::DeadlineExceeded)));
    }

    #[test]
    fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        let first = ctx.deadline().unwrap();

        let relaxed = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(relaxed.deadline(), Some(first));
    }
}
