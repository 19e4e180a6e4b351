//! Bounded-concurrency worker pool for provider calls.
//!
//! Every submission runs as its own unit of work. A shared fair semaphore caps
//! the number of provider calls in flight; waiting submissions acquire slots in
//! FIFO order. A slot is held only for the duration of one provider call, never
//! across a backoff sleep.
//!
//! A submission may carry a start deadline. Once it has passed, no new provider
//! call is started for that message, whether first attempt or retry; a call
//! already running is left to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{error, info, warn};

use super::backoff::RetryPolicy;
use crate::model::{DispatchOutcome, ErrorKind, NormalizedMessage};
use crate::provider::ProviderClient;

/// Limits applied to provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum simultaneous provider calls.
    pub max_in_flight: usize,
    /// Timeout for a single provider call.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            call_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared handle to the worker pool. Cloning is cheap.
#[derive(Clone)]
pub struct WorkerPool {
    provider: Arc<dyn ProviderClient>,
    permits: Arc<Semaphore>,
    settings: PoolSettings,
}

impl WorkerPool {
    pub fn new(provider: Arc<dyn ProviderClient>, settings: PoolSettings) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            settings,
        }
    }

    /// Number of provider calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.settings.max_in_flight.max(1) - self.permits.available_permits()
    }

    /// Deliver one message, retrying transient failures, and return its
    /// terminal outcome.
    pub async fn submit(&self, message: NormalizedMessage) -> DispatchOutcome {
        self.run(message, None).await
    }

    /// Like [`Self::submit`], but no provider call starts after `deadline`.
    /// A message that could not start in time is `Failed(DeadlineExceeded)`.
    pub async fn submit_before(&self, message: NormalizedMessage, deadline: Instant) -> DispatchOutcome {
        self.run(message, Some(deadline)).await
    }

    async fn run(&self, message: NormalizedMessage, deadline: Option<Instant>) -> DispatchOutcome {
        let template = message.kind().template_alias();
        let mut retry: u32 = 0;
        let mut last_error: Option<String> = None;

        loop {
            let attempt = retry + 1;

            let result = {
                let acquired = match deadline {
                    Some(deadline) if Instant::now() >= deadline => None,
                    Some(deadline) => timeout_at(deadline, self.permits.acquire()).await.ok(),
                    None => Some(self.permits.acquire().await),
                };

                let _permit = match acquired {
                    Some(Ok(permit)) => permit,
                    None => {
                        warn!(
                            to = %message.address,
                            template = template,
                            attempts = retry,
                            "dispatch_deadline_before_start"
                        );
                        let detail = match last_error {
                            Some(error) => format!(
                                "batch deadline passed before retry (after {} attempts): {}",
                                retry, error
                            ),
                            None => "batch deadline passed before the send started".to_string(),
                        };
                        return DispatchOutcome::failed(
                            &message.address,
                            ErrorKind::DeadlineExceeded,
                            detail,
                        );
                    }
                    Some(Err(_)) => {
                        error!(to = %message.address, "worker_pool_closed");
                        return DispatchOutcome::failed(
                            &message.address,
                            ErrorKind::Internal,
                            "worker pool closed",
                        );
                    }
                };

                timeout(self.settings.call_timeout, self.provider.send(&message)).await
            };

            let (kind, detail) = match result {
                Ok(Ok(receipt)) => {
                    info!(
                        to = %message.address,
                        template = template,
                        attempt = attempt,
                        message_id = %receipt.message_id,
                        "dispatch_sent"
                    );
                    return DispatchOutcome::sent(&message.address, receipt.message_id);
                }
                Ok(Err(e)) if !e.is_transient() => {
                    warn!(
                        to = %message.address,
                        template = template,
                        attempt = attempt,
                        error = %e,
                        "dispatch_rejected_by_provider"
                    );
                    return DispatchOutcome::rejected(
                        &message.address,
                        ErrorKind::ProviderRejected,
                        e.to_string(),
                    );
                }
                Ok(Err(e)) => (ErrorKind::ProviderUnavailable, e.to_string()),
                Err(_) => (
                    ErrorKind::Timeout,
                    format!(
                        "provider call timed out after {}ms",
                        self.settings.call_timeout.as_millis()
                    ),
                ),
            };

            if retry >= self.settings.retry.max_retries {
                error!(
                    to = %message.address,
                    template = template,
                    attempts = attempt,
                    error_kind = ?kind,
                    error = %detail,
                    "dispatch_retries_exhausted"
                );
                return DispatchOutcome::failed(
                    &message.address,
                    kind,
                    format!("{} (after {} attempts)", detail, attempt),
                );
            }

            let delay = self.settings.retry.delay(retry);
            warn!(
                to = %message.address,
                template = template,
                attempt = attempt,
                error_kind = ?kind,
                error = %detail,
                backoff_ms = delay.as_millis() as u64,
                "dispatch_attempt_failed"
            );

            sleep(delay).await;
            last_error = Some(detail);
            retry += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DispatchStatus, TemplatePayload, Welcome};
    use crate::provider::testing::{Behavior, StubProvider};
    use futures::stream::{FuturesUnordered, StreamExt};

    fn message(address: &str) -> NormalizedMessage {
        NormalizedMessage {
            address: address.to_string(),
            payload: TemplatePayload::Welcome(Welcome {
                name: "A".to_string(),
                dashboard_link: "https://app.example.com/dashboard".to_string(),
            }),
        }
    }

    fn fast_settings() -> PoolSettings {
        PoolSettings {
            max_in_flight: 5,
            call_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_retries: 2,
                backoff_ms: 5,
                backoff_factor: 2,
                max_backoff_ms: 20,
            },
        }
    }

    fn pool(stub: &StubProvider, settings: PoolSettings) -> WorkerPool {
        WorkerPool::new(Arc::new(stub.clone()), settings)
    }

    #[tokio::test]
    async fn test_submit_success() {
        let stub = StubProvider::new();
        let outcome = pool(&stub, fast_settings()).submit(message("a@x.com")).await;

        assert_eq!(outcome.status(), DispatchStatus::Sent);
        assert_eq!(outcome.provider_message_id(), Some("stub-a@x.com-1"));
        assert_eq!(outcome.error_kind(), None);
        assert_eq!(stub.calls("a@x.com"), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_attempted_retry_bound_plus_one_times() {
        let stub = StubProvider::with_default(Behavior::Transient);
        let outcome = pool(&stub, fast_settings()).submit(message("a@x.com")).await;

        assert_eq!(outcome.status(), DispatchStatus::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ProviderUnavailable));
        assert_eq!(stub.calls("a@x.com"), 3);
    }

    #[tokio::test]
    async fn test_retry_bound_zero_means_single_attempt() {
        let stub = StubProvider::with_default(Behavior::Transient);
        let mut settings = fast_settings();
        settings.retry.max_retries = 0;

        let outcome = pool(&stub, settings).submit(message("a@x.com")).await;

        assert_eq!(outcome.status(), DispatchStatus::Failed);
        assert_eq!(stub.calls("a@x.com"), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let stub = StubProvider::new().on("a@x.com", Behavior::TransientThenSucceed(2));
        let outcome = pool(&stub, fast_settings()).submit(message("a@x.com")).await;

        assert_eq!(outcome.status(), DispatchStatus::Sent);
        assert_eq!(outcome.provider_message_id(), Some("stub-a@x.com-3"));
        assert_eq!(stub.calls("a@x.com"), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let stub = StubProvider::with_default(Behavior::Permanent);
        let outcome = pool(&stub, fast_settings()).submit(message("a@x.com")).await;

        assert_eq!(outcome.status(), DispatchStatus::Rejected);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ProviderRejected));
        assert_eq!(stub.calls("a@x.com"), 1);
    }

    #[tokio::test]
    async fn test_hanging_call_times_out() {
        let stub = StubProvider::with_default(Behavior::Hang);
        let mut settings = fast_settings();
        settings.retry.max_retries = 1;

        let outcome = pool(&stub, settings).submit(message("slow@x.com")).await;

        assert_eq!(outcome.status(), DispatchStatus::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(stub.calls("slow@x.com"), 2);
    }

    #[tokio::test]
    async fn test_slow_recipient_does_not_delay_sibling() {
        let stub = StubProvider::new().on("slow@x.com", Behavior::Hang);
        let mut settings = fast_settings();
        settings.retry.max_retries = 0;
        let pool = pool(&stub, settings);

        let mut pending = FuturesUnordered::new();
        for address in ["slow@x.com", "fast@x.com"] {
            let pool = pool.clone();
            pending.push(tokio::spawn(async move { pool.submit(message(address)).await }));
        }

        let first = pending.next().await.unwrap().unwrap();
        let second = pending.next().await.unwrap().unwrap();

        assert_eq!(first.address(), "fast@x.com");
        assert_eq!(first.status(), DispatchStatus::Sent);
        assert_eq!(second.address(), "slow@x.com");
        assert_eq!(second.error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_no_send_starts_after_deadline() {
        let stub = StubProvider::new();
        let deadline = Instant::now();

        let outcome = pool(&stub, fast_settings())
            .submit_before(message("late@x.com"), deadline)
            .await;

        assert_eq!(outcome.status(), DispatchStatus::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::DeadlineExceeded));
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_queued_message_gives_up_at_deadline() {
        let stub = StubProvider::new().on("busy@x.com", Behavior::Delay(Duration::from_millis(150)));
        let mut settings = fast_settings();
        settings.max_in_flight = 1;
        let pool = pool(&stub, settings);

        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(message("busy@x.com")).await })
        };
        sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.in_flight(), 1);

        let deadline = Instant::now() + Duration::from_millis(50);
        let queued = pool.submit_before(message("queued@x.com"), deadline).await;

        assert_eq!(queued.error_kind(), Some(ErrorKind::DeadlineExceeded));
        assert_eq!(stub.calls("queued@x.com"), 0);
        assert!(busy.await.unwrap().is_sent());
    }

    #[tokio::test]
    async fn test_no_retry_after_deadline() {
        let stub = StubProvider::with_default(Behavior::Transient);
        let mut settings = fast_settings();
        settings.retry.backoff_ms = 200;
        settings.retry.max_backoff_ms = 200;
        let deadline = Instant::now() + Duration::from_millis(50);

        let outcome = pool(&stub, settings)
            .submit_before(message("a@x.com"), deadline)
            .await;

        assert_eq!(outcome.status(), DispatchStatus::Failed);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::DeadlineExceeded));
        assert!(outcome.detail().contains("after 1 attempts"));
        assert_eq!(stub.calls("a@x.com"), 1);
    }

    #[tokio::test]
    async fn test_in_flight_bounded() {
        let stub = StubProvider::with_default(Behavior::Delay(Duration::from_millis(20)));
        let mut settings = fast_settings();
        settings.max_in_flight = 3;
        let pool = pool(&stub, settings);

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.submit(message(&format!("r{}@x.com", i))).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_sent());
        }

        assert_eq!(stub.total_calls(), 12);
        assert!(stub.peak_in_flight() <= 3);
        assert_eq!(pool.in_flight(), 0);
    }
}
