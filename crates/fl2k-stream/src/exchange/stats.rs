use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of the exchange counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeStats {
    /// Slots handed from the writer to the ring.
    pub released: u64,
    /// Slots handed to the driver.
    pub delivered: u64,
    /// Underflow faults raised.
    pub underflows: u64,
    /// Overflow faults raised.
    pub overflows: u64,
    /// Filled or in-progress slots thrown away by drains.
    pub discarded: u64,
    /// Reset drains performed.
    pub resets: u64,
}

#[derive(Default)]
pub(crate) struct ExchangeMetrics {
    released: AtomicU64,
    delivered: AtomicU64,
    underflows: AtomicU64,
    overflows: AtomicU64,
    discarded: AtomicU64,
    resets: AtomicU64,
}

impl ExchangeMetrics {
    pub(crate) fn note_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_fault(&self, kind: super::FaultKind) {
        let counter = match kind {
            super::FaultKind::Underflow => &self.underflows,
            super::FaultKind::Overflow => &self.overflows,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_drain(&self, discarded: usize, reset: bool) {
        if discarded != 0 {
            self.discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }
        if reset {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> ExchangeStats {
        ExchangeStats {
            released: self.released.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            underflows: self.underflows.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}
