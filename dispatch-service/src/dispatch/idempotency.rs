//! Idempotency bookkeeping for dispatch calls.
//!
//! Callers may attach an idempotency key to a dispatch. The first call with a
//! key reserves it; once the batch finishes its report is cached for the
//! configured TTL and replayed for repeats carrying the same key and the same
//! batch. Reusing a key for a different batch is a conflict.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::model::{BatchReport, RecipientRequest};

/// SHA-256 over the canonical content of a batch.
pub type Fingerprint = [u8; 32];

/// Fingerprint a batch so a reused key can be told apart from a replay.
pub fn fingerprint(batch: &[RecipientRequest]) -> Fingerprint {
    let mut hasher = Sha256::new();

    for request in batch {
        hasher.update(request.address.as_bytes());
        hasher.update([0u8]);
        hasher.update(request.template_kind.template_alias().as_bytes());
        hasher.update([0u8]);
        for (name, value) in &request.fields {
            hasher.update(name.as_bytes());
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([2u8]);
    }

    hasher.finalize().into()
}

enum EntryState {
    InProgress,
    Done(BatchReport),
}

struct Entry {
    fingerprint: Fingerprint,
    stored_at: Instant,
    state: EntryState,
}

/// Result of reserving an idempotency key.
pub enum Reservation {
    /// First use of the key; dispatch and then call [`ReservationGuard::complete`].
    Fresh(ReservationGuard),
    /// The key already finished with this batch.
    Replay(BatchReport),
    /// A call with this key is still running.
    InProgress,
    /// The key was used for a different batch.
    Conflict,
}

/// In-memory idempotency cache. Clones share the same entries.
#[derive(Clone)]
pub struct IdempotencyStore {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve `key` for a batch with the given fingerprint.
    pub fn reserve(&self, key: &str, fingerprint: Fingerprint) -> Reservation {
        let now = Instant::now();
        let mut entries = self.lock();

        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
        if entries.len() < before {
            debug!(purged = before - entries.len(), "idempotency_entries_expired");
        }

        if let Some(entry) = entries.get(key) {
            if entry.fingerprint != fingerprint {
                return Reservation::Conflict;
            }
            return match &entry.state {
                EntryState::InProgress => Reservation::InProgress,
                EntryState::Done(report) => {
                    info!(key = %key, "idempotency_replay");
                    Reservation::Replay(report.clone())
                }
            };
        }

        entries.insert(
            key.to_string(),
            Entry {
                fingerprint,
                stored_at: now,
                state: EntryState::InProgress,
            },
        );

        Reservation::Fresh(ReservationGuard {
            store: self.clone(),
            key: key.to_string(),
            completed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a fresh reservation. Dropping it without completing releases the key
/// so a retried request can run.
pub struct ReservationGuard {
    store: IdempotencyStore,
    key: String,
    completed: bool,
}

impl ReservationGuard {
    /// Cache the finished report under the reserved key.
    pub fn complete(mut self, report: &BatchReport) {
        let mut entries = self.store.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.stored_at = Instant::now();
            entry.state = EntryState::Done(report.clone());
        }
        self.completed = true;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.store.lock().remove(&self.key);
        }
    }
}
