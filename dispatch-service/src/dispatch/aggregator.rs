//! Collects per-recipient outcomes in completion order and hands them back in
//! request order.

use tracing::warn;

use crate::model::{BatchReport, BatchSummary, DispatchOutcome, ErrorKind};

/// Index-addressed outcome buffer for one batch.
#[derive(Debug)]
pub struct ResultAggregator {
    addresses: Vec<String>,
    slots: Vec<Option<DispatchOutcome>>,
    received: usize,
}

impl ResultAggregator {
    /// Create a buffer for a batch, one slot per requested address.
    pub fn new(addresses: Vec<String>) -> Self {
        let slots = vec![None; addresses.len()];
        Self {
            addresses,
            slots,
            received: 0,
        }
    }

    /// Record the outcome for the recipient at `index`.
    ///
    /// Returns `false` if the index is out of range or already has an outcome;
    /// the first outcome for a recipient is final.
    pub fn accumulate(&mut self, index: usize, outcome: DispatchOutcome) -> bool {
        let total = self.slots.len();
        match self.slots.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(outcome);
                self.received += 1;
                true
            }
            Some(Some(existing)) => {
                warn!(
                    index = index,
                    address = %existing.address(),
                    "aggregator_duplicate_outcome"
                );
                false
            }
            None => {
                warn!(index = index, total = total, "aggregator_index_out_of_range");
                false
            }
        }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    /// Produce the ordered report. Every recipient must have an outcome.
    pub fn finalize(self) -> BatchReport {
        debug_assert!(
            self.is_complete(),
            "finalize called with {} of {} outcomes",
            self.received,
            self.slots.len()
        );
        self.finalize_pending(ErrorKind::Internal, "no outcome recorded")
    }

    /// Produce the ordered report, marking recipients without an outcome as
    /// `Failed` with the given kind.
    pub fn finalize_pending(self, kind: ErrorKind, detail: &str) -> BatchReport {
        let outcomes: Vec<DispatchOutcome> = self
            .slots
            .into_iter()
            .zip(self.addresses)
            .map(|(slot, address)| {
                slot.unwrap_or_else(|| DispatchOutcome::failed(address, kind, detail))
            })
            .collect();

        let summary = BatchSummary::from_outcomes(&outcomes);
        BatchReport { outcomes, summary }
    }
}
