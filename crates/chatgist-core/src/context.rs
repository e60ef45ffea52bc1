//! Operation context: cancellation plus an optional deadline.
//!
//! Every service call gets one. Retry attempts, backoff sleeps, transport
//! calls and audio tool invocations all race against it, so a Ctrl+C or an
//! expired flow timeout stops work at the next suspension point.

use std::future::Future;
use std::time::Duration;

use chatgist_types::error::GistError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    Expired,
}

impl Interrupted {
    pub fn into_gist_error(self, operation: &'static str) -> GistError {
        match self {
            Interrupted::Cancelled => GistError::Cancelled { operation },
            Interrupted::Expired => GistError::DeadlineExceeded { operation },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an externally owned token (e.g. one cancelled on Ctrl+C).
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    /// Child context that is cancelled with this one and expires no later
    /// than `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: Some(self.deadline.map_or(candidate, |d| d.min(candidate))),
        }
    }

    /// Child context with the same deadline.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails fast if the operation should stop.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted::Cancelled)
        } else if self.is_expired() {
            Err(Interrupted::Expired)
        } else {
            Ok(())
        }
    }

    /// The smaller of `limit` and the time left before the deadline.
    pub fn bound(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |r| r.min(limit))
    }

    /// Sleep for `duration`, waking early on cancellation or deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.check()?;
        let wake = Instant::now() + duration;
        let wake = self.deadline.map_or(wake, |d| d.min(wake));
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Interrupted::Cancelled),
            _ = tokio::time::sleep_until(wake) => self.check(),
        }
    }

    /// Drive `fut` to completion unless the context stops first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        let sleep = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Interrupted::Cancelled),
            _ = sleep => Err(Interrupted::Expired),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn child_inherits_tighter_deadline() {
        let outer = OperationContext::new().with_timeout(Duration::from_secs(5));
        let inner = outer.with_timeout(Duration::from_secs(60));
        assert_eq!(inner.deadline(), outer.deadline());
        assert!(inner.remaining().unwrap() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_parent_cancels_child() {
        let parent = OperationContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.check(), Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_wakes_on_cancel() {
        let ctx = OperationContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let result = ctx.sleep(Duration::from_secs(3600)).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_at_deadline() {
        let ctx = OperationContext::new().with_timeout(Duration::from_secs(2));
        let result = ctx.sleep(Duration::from_secs(10)).await;
        assert_eq!(result, Err(Interrupted::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_slow_future() {
        let ctx = OperationContext::new().with_timeout(Duration::from_secs(1));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(result, Err(Interrupted::Expired));
    }

    #[tokio::test]
    async fn run_returns_output() {
        let ctx = OperationContext::new();
        assert_eq!(ctx.run(async { 42 }).await, Ok(42));
    }
}
