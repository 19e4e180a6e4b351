//! Bulk dispatch engine.
//!
//! Orchestrates one dispatch call:
//! 1. Reject malformed batches before any work starts
//! 2. Validate every recipient; failures become `Rejected` immediately
//! 3. Submit the rest to the worker pool concurrently
//! 4. Collect outcomes until the batch completes or its deadline (plus grace) passes
//! 5. Return outcomes in request order with a consistent summary
//!
//! A single send is a batch of one and takes exactly the same path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{error, info, warn};

use super::aggregator::ResultAggregator;
use super::backoff::RetryPolicy;
use super::idempotency::{fingerprint, IdempotencyStore, Reservation};
use super::pool::{PoolSettings, WorkerPool};
use crate::model::{BatchReport, DispatchOutcome, ErrorKind, RecipientRequest};
use crate::provider::ProviderClient;
use crate::validate::{validate, ValidationContext};

/// Errors that abort a whole dispatch call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("idempotency key already used for a different request")]
    IdempotencyConflict,

    #[error("a request with this idempotency key is still in progress")]
    IdempotencyInProgress,

    #[error("invalid dispatch configuration: {0}")]
    Configuration(String),

    #[error("dispatch task failed: {0}")]
    Internal(String),
}

/// Engine tuning, derived from [`crate::Config`] in production.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub max_in_flight: usize,
    pub max_batch_size: usize,
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    /// Overall budget for one dispatch call.
    pub batch_deadline: Duration,
    /// Extra time in-flight sends get once the deadline has passed.
    pub deadline_grace: Duration,
    pub invite_base_url: String,
    pub invite_expiry_days: u64,
    pub idempotency_ttl: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            max_batch_size: 100,
            provider_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            batch_deadline: Duration::from_secs(60),
            deadline_grace: Duration::from_secs(5),
            invite_base_url: "http://localhost:8080".to_string(),
            invite_expiry_days: 30,
            idempotency_ttl: Duration::from_secs(600),
        }
    }
}

/// Report plus whether it was served from the idempotency cache.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub report: BatchReport,
    pub replayed: bool,
}

/// Validates, schedules and aggregates dispatch calls.
///
/// Clones share the worker pool and the idempotency store.
#[derive(Clone)]
pub struct DispatchEngine {
    provider: Arc<dyn ProviderClient>,
    pool: WorkerPool,
    context: ValidationContext,
    idempotency: IdempotencyStore,
    settings: DispatchSettings,
}

impl DispatchEngine {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        settings: DispatchSettings,
    ) -> Result<Self, DispatchError> {
        let context = ValidationContext::new(
            &settings.invite_base_url,
            settings.invite_expiry_days,
            Utc::now().date_naive(),
        )
        .map_err(|e| {
            DispatchError::Configuration(format!(
                "invite base URL {:?}: {}",
                settings.invite_base_url, e
            ))
        })?;

        let pool = WorkerPool::new(
            Arc::clone(&provider),
            PoolSettings {
                max_in_flight: settings.max_in_flight,
                call_timeout: settings.provider_timeout,
                retry: settings.retry,
            },
        );

        Ok(Self {
            provider,
            pool,
            context,
            idempotency: IdempotencyStore::new(settings.idempotency_ttl),
            settings,
        })
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Dispatch a batch and return one outcome per recipient, in request order.
    pub async fn dispatch(&self, batch: Vec<RecipientRequest>) -> Result<BatchReport, DispatchError> {
        self.check_batch(&batch)?;

        let total = batch.len();
        let ctx = self.context.clone().at(Utc::now().date_naive());
        let mut aggregator =
            ResultAggregator::new(batch.iter().map(|r| r.address.clone()).collect());
        let mut tasks: JoinSet<(usize, DispatchOutcome)> = JoinSet::new();
        let mut rejected = 0usize;
        let deadline = Instant::now() + self.settings.batch_deadline;

        for (index, request) in batch.iter().enumerate() {
            match validate(request, &ctx) {
                Ok(message) => {
                    let pool = self.pool.clone();
                    let address = request.address.clone();
                    tasks.spawn(async move {
                        let outcome = pool.submit_before(message, deadline).await;
                        (index, outcome.for_address(address))
                    });
                }
                Err(e) => {
                    rejected += 1;
                    aggregator.accumulate(
                        index,
                        DispatchOutcome::rejected(&request.address, e.kind(), e.to_string()),
                    );
                }
            }
        }

        info!(
            total = total,
            submitted = total - rejected,
            rejected_by_validation = rejected,
            "dispatch_batch_started"
        );

        collect_until(&mut tasks, &mut aggregator, deadline).await;

        let mut deadline_exceeded = false;
        if !tasks.is_empty() {
            deadline_exceeded = true;
            warn!(
                pending = tasks.len(),
                grace_ms = self.settings.deadline_grace.as_millis() as u64,
                "dispatch_deadline_reached"
            );
            collect_until(&mut tasks, &mut aggregator, deadline + self.settings.deadline_grace)
                .await;

            if !tasks.is_empty() {
                abandon(&mut tasks, &mut aggregator);
            }
        }

        let report = if aggregator.is_complete() {
            aggregator.finalize()
        } else if deadline_exceeded {
            aggregator.finalize_pending(
                ErrorKind::DeadlineExceeded,
                "batch deadline exceeded before delivery completed",
            )
        } else {
            aggregator.finalize_pending(ErrorKind::Internal, "dispatch task terminated unexpectedly")
        };

        for outcome in &report.outcomes {
            info!(
                address = %outcome.address(),
                status = ?outcome.status(),
                error_kind = ?outcome.error_kind(),
                message_id = ?outcome.provider_message_id(),
                detail = %outcome.detail(),
                "dispatch_outcome"
            );
        }

        info!(
            total = report.summary.total,
            successful = report.summary.successful,
            failed = report.summary.failed,
            "dispatch_batch_complete"
        );

        Ok(report)
    }

    /// Dispatch with optional idempotency. A repeated key with the same batch
    /// returns the cached report without contacting the provider again.
    pub async fn dispatch_idempotent(
        &self,
        key: Option<&str>,
        batch: Vec<RecipientRequest>,
    ) -> Result<DispatchResult, DispatchError> {
        let key = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => {
                return self.dispatch(batch).await.map(|report| DispatchResult {
                    report,
                    replayed: false,
                })
            }
        };

        self.check_batch(&batch)?;

        match self.idempotency.reserve(key, fingerprint(&batch)) {
            Reservation::Fresh(guard) => {
                // Detached so the report is recorded even if the caller goes away.
                let engine = self.clone();
                let task = tokio::spawn(async move {
                    let report = engine.dispatch(batch).await?;
                    guard.complete(&report);
                    Ok::<_, DispatchError>(report)
                });

                let report = task.await.map_err(|e| {
                    error!(error = %e, "dispatch_idempotent_task_failed");
                    DispatchError::Internal(e.to_string())
                })??;
                Ok(DispatchResult {
                    report,
                    replayed: false,
                })
            }
            Reservation::Replay(report) => Ok(DispatchResult {
                report,
                replayed: true,
            }),
            Reservation::InProgress => Err(DispatchError::IdempotencyInProgress),
            Reservation::Conflict => Err(DispatchError::IdempotencyConflict),
        }
    }

    /// Send to one recipient. Identical to dispatching a batch of one.
    pub async fn send_one(&self, request: RecipientRequest) -> Result<DispatchOutcome, DispatchError> {
        self.send_one_idempotent(None, request).await.map(|(outcome, _)| outcome)
    }

    /// [`Self::send_one`] with optional idempotency. Also reports whether the
    /// outcome was replayed.
    pub async fn send_one_idempotent(
        &self,
        key: Option<&str>,
        request: RecipientRequest,
    ) -> Result<(DispatchOutcome, bool), DispatchError> {
        let result = self.dispatch_idempotent(key, vec![request]).await?;
        let outcome = result.report.outcomes.into_iter().next().ok_or_else(|| {
            error!("dispatch_single_missing_outcome");
            DispatchError::InvalidBatch("batch of one produced no outcome".to_string())
        })?;
        Ok((outcome, result.replayed))
    }

    /// Whether the provider answers its health check within the call timeout.
    pub async fn health(&self) -> bool {
        match timeout(self.settings.provider_timeout, self.provider.health_check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "provider_health_check_failed");
                false
            }
            Err(_) => {
                warn!("provider_health_check_timeout");
                false
            }
        }
    }

    fn check_batch(&self, batch: &[RecipientRequest]) -> Result<(), DispatchError> {
        if batch.is_empty() {
            return Err(DispatchError::InvalidBatch(
                "batch must contain at least one recipient".to_string(),
            ));
        }

        if batch.len() > self.settings.max_batch_size {
            return Err(DispatchError::InvalidBatch(format!(
                "batch of {} recipients exceeds the maximum of {}",
                batch.len(),
                self.settings.max_batch_size
            )));
        }

        Ok(())
    }
}

/// Drain finished tasks into the aggregator until all are done or `until` passes.
async fn collect_until(
    tasks: &mut JoinSet<(usize, DispatchOutcome)>,
    aggregator: &mut ResultAggregator,
    until: Instant,
) {
    let expired = sleep_until(until);
    tokio::pin!(expired);

    loop {
        tokio::select! {
            biased;

            joined = tasks.join_next() => match joined {
                Some(Ok((index, outcome))) => {
                    aggregator.accumulate(index, outcome);
                }
                Some(Err(e)) => {
                    error!(error = %e, "dispatch_task_failed");
                }
                None => break,
            },
            _ = &mut expired => break,
        }
    }
}

/// Abort tasks still running after the grace period. Tasks that finished in
/// the meantime keep their outcomes.
fn abandon(tasks: &mut JoinSet<(usize, DispatchOutcome)>, aggregator: &mut ResultAggregator) {
    let pending = tasks.len();
    tasks.abort_all();

    let mut preserved = 0usize;
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok((index, outcome)) => {
                if aggregator.accumulate(index, outcome) {
                    preserved += 1;
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!(error = %e, "dispatch_task_failed");
            }
        }
    }

    warn!(
        abandoned = pending - preserved,
        preserved = preserved,
        "dispatch_deadline_exceeded"
    );
}
