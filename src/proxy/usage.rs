//! Per-proxy usage counters for the run summary.
//!
//! Counters are keyed by ring slot, so two ring entries that share a host
//! but differ in credentials are tracked apart. They are observational:
//! nothing reads them back to pick proxies.

use dashmap::DashMap;
use serde::Serialize;

/// Counters for one proxy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounts {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub in_flight: u64,
}

/// Tracks attempts per ring slot across every executor of a run
#[derive(Debug, Default)]
pub struct ProxyUsage {
    counts: DashMap<usize, UsageCounts>,
}

impl ProxyUsage {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Mark an attempt through ring slot `slot` as started
    pub fn acquire(&self, slot: usize) {
        let mut entry = self.counts.entry(slot).or_default();
        entry.attempts += 1;
        entry.in_flight += 1;
    }

    /// Mark an attempt through ring slot `slot` as finished
    pub fn release(&self, slot: usize, success: bool) {
        self.counts.entry(slot).and_modify(|c| {
            c.in_flight = c.in_flight.saturating_sub(1);
            if success {
                c.successes += 1;
            } else {
                c.failures += 1;
            }
        });
    }

    /// All counters, sorted by slot
    pub fn snapshot(&self) -> Vec<(usize, UsageCounts)> {
        let mut all: Vec<(usize, UsageCounts)> = self
            .counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        all.sort_by_key(|(slot, _)| *slot);
        all
    }

    /// Forget every counter
    pub fn clear(&self) {
        self.counts.clear();
    }
}
