//! Scripted provider for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ProviderClient, ProviderError, ProviderReceipt};
use crate::model::NormalizedMessage;

/// How the stub answers for a given address.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    /// Answer with a 503 on every call.
    Transient,
    /// Answer with a 422 on every call.
    Permanent,
    /// Fail with a 503 this many times, then succeed.
    TransientThenSucceed(usize),
    /// Never answer.
    Hang,
    /// Succeed after sleeping.
    Delay(Duration),
}

#[derive(Default)]
struct StubState {
    behaviors: HashMap<String, Behavior>,
    calls: HashMap<String, usize>,
    completions: Vec<String>,
}

/// Provider double recording every call.
#[derive(Clone)]
pub struct StubProvider {
    state: Arc<Mutex<StubState>>,
    default: Behavior,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self::with_default(Behavior::Succeed)
    }

    pub fn with_default(default: Behavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState::default())),
            default,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Script the behavior for one address.
    pub fn on(self, address: &str, behavior: Behavior) -> Self {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .insert(address.to_string(), behavior);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of send attempts made for an address.
    pub fn calls(&self, address: &str) -> usize {
        self.state.lock().unwrap().calls.get(address).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    /// Addresses in the order their calls returned.
    pub fn completions(&self) -> Vec<String> {
        self.state.lock().unwrap().completions.clone()
    }

    /// Highest number of simultaneous calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

fn unavailable() -> ProviderError {
    ProviderError::Status {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

#[async_trait]
impl ProviderClient for StubProvider {
    async fn send(&self, message: &NormalizedMessage) -> Result<ProviderReceipt, ProviderError> {
        let (behavior, attempt) = {
            let mut state = self.state.lock().unwrap();
            let behavior = state
                .behaviors
                .get(&message.address)
                .copied()
                .unwrap_or(self.default);
            let calls = state.calls.entry(message.address.clone()).or_insert(0);
            *calls += 1;
            (behavior, *calls)
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));

        let result = match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Transient => Err(unavailable()),
            Behavior::Permanent => Err(ProviderError::Status {
                status: 422,
                message: "Inactive recipient".to_string(),
            }),
            Behavior::TransientThenSucceed(failures) => {
                if attempt <= failures {
                    Err(unavailable())
                } else {
                    Ok(())
                }
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        };

        self.state
            .lock()
            .unwrap()
            .completions
            .push(message.address.clone());

        result.map(|()| ProviderReceipt {
            message_id: format!("stub-{}-{}", message.address, attempt),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Network("connection refused".to_string()))
        }
    }
}
