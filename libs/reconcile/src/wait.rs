//! Bounded polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::ReconcileError;

/// Poll `check` every `interval` until it reports done, fails, or `timeout`
/// elapses.
///
/// `check` runs at least once. The timeout is evaluated after each failed
/// check, so a check that becomes true on its last poll still succeeds.
pub async fn wait_for<F, Fut, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: From<ReconcileError>,
{
    let started = Instant::now();
    loop {
        if check().await? {
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed > timeout {
            return Err(ReconcileError::Timeout {
                resource: desc.to_string(),
                elapsed,
            }
            .into());
        }

        debug!(waiting_for = desc, elapsed_ms = elapsed.as_millis() as u64, "Still waiting");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Reconcile(ReconcileError),
        Check,
    }

    impl From<ReconcileError> for TestError {
        fn from(e: ReconcileError) -> Self {
            Self::Reconcile(e)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_done() {
        let polls = AtomicU32::new(0);
        let result: Result<(), TestError> = wait_for(
            "server",
            Duration::from_secs(60),
            Duration::from_secs(1),
            || async { Ok(polls.fetch_add(1, Ordering::SeqCst) >= 2) },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let result: Result<(), TestError> = wait_for(
            "volume attachment",
            Duration::from_secs(10),
            Duration::from_secs(3),
            || async { Ok(false) },
        )
        .await;

        match result {
            Err(TestError::Reconcile(ReconcileError::Timeout { resource, .. })) => {
                assert_eq!(resource, "volume attachment");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_is_returned() {
        let result: Result<(), TestError> = wait_for(
            "dns",
            Duration::from_secs(10),
            Duration::from_secs(1),
            || async { Err(TestError::Check) },
        )
        .await;

        assert!(matches!(result, Err(TestError::Check)));
    }
}
