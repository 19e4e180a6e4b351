//! Bulk dispatch: worker pool, result aggregation and the engine tying them
//! together.
//!
//! ## Flow
//!
//! ```text
//! BatchRequest → Engine → validate → WorkerPool (semaphore, timeout, retry) → Provider
//!                           │                          │
//!                           └──── Rejected ────────────┴──→ ResultAggregator → BatchReport
//! ```

pub mod aggregator;
pub mod backoff;
pub mod engine;
pub mod idempotency;
pub mod pool;

pub use aggregator::ResultAggregator;
pub use backoff::RetryPolicy;
pub use engine::{DispatchEngine, DispatchError, DispatchResult, DispatchSettings};
pub use idempotency::IdempotencyStore;
pub use pool::{PoolSettings, WorkerPool};
