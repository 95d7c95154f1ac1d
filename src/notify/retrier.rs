//! Retry-with-backoff around a [`Notifier`] (spec §4.6 step 6 "Retry").

use super::notifier::{NotifyError, Notifier};
use crate::alert::Alert;
use crate::error::PipelineError;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.factor);
        scaled.min(self.cap)
    }
}

/// Retries `notifier.notify` on [`NotifyError::Retriable`] failures using
/// exponential backoff, giving up on [`NotifyError::Fatal`], cancellation,
/// or once `deadline` passes -- whichever comes first (spec §4.6 step 6:
/// "overall deadline = groupInterval or context cancellation").
pub async fn send_with_retry(
    notifier: &dyn Notifier,
    alerts: &[Alert],
    policy: &RetryPolicy,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    let mut backoff = policy.initial_backoff;
    loop {
        match notifier.notify(alerts).await {
            Ok(()) => return Ok(()),
            Err(NotifyError::Fatal(reason)) => {
                return Err(PipelineError::Fatal { stage: "send", reason });
            }
            Err(NotifyError::Retriable(reason)) => {
                if Instant::now() >= deadline {
                    return Err(PipelineError::DeadlineExceeded { stage: "send", reason });
                }
                warn!(notifier = notifier.name(), %reason, ?backoff, "retrying after transient failure");
                tokio::select! {
                    _ = sleep(backoff) => {}
                    _ = sleep_until(deadline) => {
                        return Err(PipelineError::DeadlineExceeded { stage: "send", reason });
                    }
                    _ = cancel.cancelled() => {
                        return Err(PipelineError::Cancelled { stage: "send" });
                    }
                }
                backoff = policy.next_backoff(backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Alert;
    use crate::types::now_millis;
    use async_trait::async_trait;

    struct AlwaysRetriable;

    #[async_trait]
    impl Notifier for AlwaysRetriable {
        fn name(&self) -> &str {
            "always-retriable"
        }

        async fn notify(&self, _alerts: &[Alert]) -> Result<(), NotifyError> {
            Err(NotifyError::Retriable("connection refused".to_string()))
        }
    }

    fn alert(name: &str) -> Alert {
        Alert {
            labels: [("alertname".to_string(), name.to_string())].into_iter().collect(),
            annotations: Default::default(),
            starts_at: now_millis(),
            ends_at: 0,
            generator_url: String::new(),
            updated_at: now_millis(),
            timeout: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_once_deadline_elapses() {
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(10), factor: 2.0, cap: Duration::from_millis(50) };
        let deadline = Instant::now() + Duration::from_millis(100);
        let result =
            send_with_retry(&AlwaysRetriable, &[alert("Foo")], &policy, deadline, &CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::DeadlineExceeded { stage: "send", .. })));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(100), factor: 2.0, cap: Duration::from_millis(350) };
        let b1 = policy.next_backoff(Duration::from_millis(100));
        let b2 = policy.next_backoff(b1);
        let b3 = policy.next_backoff(b2);
        assert_eq!(b1, Duration::from_millis(200));
        assert_eq!(b2, Duration::from_millis(350)); // capped from 400
        assert_eq!(b3, Duration::from_millis(350));
    }
}
