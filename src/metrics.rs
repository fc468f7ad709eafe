//! Ambient observability counters. The in-process analogue of the
//! teacher's atomic `Metrics` struct and `/metrics` endpoint — here
//! exposed through `stats()` rather than an HTTP route, since the engine is
//! embedded rather than a standalone server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    packets_sent: AtomicU64,
    packets_failed: AtomicU64,
    permanent_drops: AtomicU64,
    duplicates_dropped: AtomicU64,
    invalid_dropped: AtomicU64,
    expired_dropped: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    consecutive_failures: AtomicU64,
    paused: AtomicBool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub packets_sent: u64,
    pub packets_failed: u64,
    pub permanent_drops: u64,
    pub duplicates_dropped: u64,
    pub invalid_dropped: u64,
    pub expired_dropped: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub pending: u64,
    pub consecutive_failures: u64,
    pub paused: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.packets_failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_permanent_drop(&self) {
        self.permanent_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: crate::ingress::DropReason) {
        match reason {
            crate::ingress::DropReason::Duplicate => self.duplicates_dropped.fetch_add(1, Ordering::Relaxed),
            crate::ingress::DropReason::Invalid => self.invalid_dropped.fetch_add(1, Ordering::Relaxed),
            crate::ingress::DropReason::Expired => self.expired_dropped.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, pending: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_failed: self.packets_failed.load(Ordering::Relaxed),
            permanent_drops: self.permanent_drops.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            invalid_dropped: self.invalid_dropped.load(Ordering::Relaxed),
            expired_dropped: self.expired_dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            pending,
            consecutive_failures: self.consecutive_failures(),
            paused: self.is_paused(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sent_resets_consecutive_failures() {
        let m = Metrics::new();
        m.record_failed();
        m.record_failed();
        assert_eq!(m.consecutive_failures(), 2);
        m.record_sent();
        assert_eq!(m.consecutive_failures(), 0);
    }

    #[test]
    fn snapshot_reports_current_counters() {
        let m = Metrics::new();
        m.record_sent();
        m.record_failed();
        m.record_drop(crate::ingress::DropReason::Duplicate);
        let snap = m.snapshot(3);
        assert_eq!(snap.packets_sent, 1);
        assert_eq!(snap.packets_failed, 1);
        assert_eq!(snap.duplicates_dropped, 1);
        assert_eq!(snap.pending, 3);
    }
}
