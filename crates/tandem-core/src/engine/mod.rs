//! Down-sync and up-sync engines plus the per-run context they share.

mod down;
mod up;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::models::{SyncMode, SyncRunId};
use crate::remote::RemoteResult;

pub use down::DownSync;
pub use up::UpSync;

/// Cooperative cancellation shared by everything working on one run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.cancelled() => Err(Error::Cancelled),
        }
    }
}

/// Identity and cancellation token of one sync run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: SyncRunId,
    pub mode: SyncMode,
    pub cancel: CancelFlag,
}

impl RunContext {
    #[must_use]
    pub fn new(run_id: SyncRunId, mode: SyncMode) -> Self {
        Self {
            run_id,
            mode,
            cancel: CancelFlag::new(),
        }
    }

    /// Fail with [`Error::Cancelled`] once the run has been cancelled.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Errors that end the whole run instead of a single type batch.
pub(crate) const fn is_fatal(error: &Error) -> bool {
    matches!(error, Error::Cancelled | Error::StoreClosed)
}

/// Run a remote call, retrying transient failures with backoff.
///
/// The call itself is abandoned as soon as the run is cancelled.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    ctx: &RunContext,
    label: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut attempts = 0;
    loop {
        ctx.ensure_active()?;
        attempts += 1;

        let result = tokio::select! {
            result = call() => result,
            () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && policy.allows_retry(attempts) => {
                let delay = policy.delay_for(attempts);
                tracing::warn!(
                    run_id = %ctx.run_id,
                    attempt = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "{label} failed, retrying: {error}"
                );
                ctx.cancel.sleep(delay).await?;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::remote::RemoteError;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let ctx = RunContext::new(SyncRunId::new(1), SyncMode::Incremental);
        let calls = AtomicU32::new(0);

        let value = with_retry(&policy(3), &ctx, "select", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::Unavailable("offline".to_string()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let ctx = RunContext::new(SyncRunId::new(1), SyncMode::Incremental);
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&policy(2), &ctx, "select", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Unavailable("offline".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Remote(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let ctx = RunContext::new(SyncRunId::new(1), SyncMode::Incremental);
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&policy(5), &ctx, "upsert", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Status {
                status: 422,
                message: "invalid".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let ctx = RunContext::new(SyncRunId::new(1), SyncMode::Incremental);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result: Result<()> = with_retry(&policy(5), &ctx, "select", || async {
            Err(RemoteError::Unavailable("offline".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let flag = CancelFlag::new();
        flag.cancel();
        flag.cancelled().await;
        assert!(flag.is_cancelled());
    }
}
