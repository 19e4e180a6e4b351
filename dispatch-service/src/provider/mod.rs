//! Mail provider abstraction.
//!
//! The dispatch engine treats the provider as an opaque capability: send one
//! message, get back a receipt or a classified error. The production
//! implementation talks to a Postmark-compatible template API; tests use a
//! scripted stub.

pub mod postmark;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::NormalizedMessage;

pub use postmark::PostmarkClient;

/// Acknowledgement from the provider that a message was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub message_id: String,
}

/// Failure reported by a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Connection refused, reset, DNS failure and similar transport problems.
    #[error("provider unreachable: {0}")]
    Network(String),

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Network errors, request timeouts (408), rate limits (429) and server
    /// errors (5xx) are transient. Everything else is a permanent rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Status { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
        }
    }
}

/// Capability to hand one message to the upstream mail provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send a single message.
    async fn send(&self, message: &NormalizedMessage) -> Result<ProviderReceipt, ProviderError>;

    /// Check that the provider is reachable with the configured credentials.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
