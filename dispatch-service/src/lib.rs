//! Dispatch - transactional email dispatch service.
//!
//! Sends templated emails (startup invites, team invites, welcome emails)
//! through a Postmark-compatible provider, one at a time or in bulk.
//!
//! ## Architecture
//!
//! ```text
//! HTTP → web → DispatchEngine → validate → WorkerPool → ProviderClient
//!                    ↑                          │
//!                    └──── ResultAggregator ←───┘
//! ```
//!
//! Bulk sends run with bounded concurrency, bounded retries and an overall
//! deadline. Results always come back in request order.

pub mod config;
pub mod dispatch;
pub mod model;
pub mod provider;
pub mod validate;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchEngine, DispatchError, DispatchSettings};
pub use model::{
    BatchReport, BatchSummary, DispatchOutcome, DispatchStatus, ErrorKind, RecipientRequest,
    TemplateKind,
};
pub use provider::{PostmarkClient, ProviderClient, ProviderError};
pub use web::AppState;
