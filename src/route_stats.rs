//! Route-stats table: rolling per-neighbor send reward, kept for
//! diagnostics and as the hook point for a future Q-learning extension.
//! Read-only input to nothing in this crate's Scorer — scoring stays pure.

use dashmap::DashMap;
use serde::Serialize;

pub const REWARD_SUCCESS: i64 = 10;
pub const REWARD_FAILURE: i64 = -5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RouteStats {
    pub reward: i64,
    pub successes: u64,
    pub failures: u64,
}

/// `neighbor_id -> RouteStats`, safe for concurrent updates from the
/// orchestrator's drain loop and concurrent reads from diagnostics.
#[derive(Default)]
pub struct RouteStatsTable(DashMap<String, RouteStats>);

impl RouteStatsTable {
    pub fn new() -> Self {
        Self(DashMap::new())
    }

    pub fn record_success(&self, target_id: &str) {
        let mut entry = self.0.entry(target_id.to_string()).or_default();
        entry.reward += REWARD_SUCCESS;
        entry.successes += 1;
    }

    pub fn record_failure(&self, target_id: &str) {
        let mut entry = self.0.entry(target_id.to_string()).or_default();
        entry.reward += REWARD_FAILURE;
        entry.failures += 1;
    }

    pub fn get(&self, target_id: &str) -> Option<RouteStats> {
        self.0.get(target_id).map(|e| *e.value())
    }

    pub fn snapshot(&self) -> std::collections::HashMap<String, RouteStats> {
        self.0.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_then_failure_nets_the_combined_reward() {
        let t = RouteStatsTable::new();
        t.record_success("C");
        t.record_success("C");
        t.record_failure("C");
        let stats = t.get("C").unwrap();
        assert_eq!(stats.reward, REWARD_SUCCESS * 2 + REWARD_FAILURE);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn unknown_target_has_no_entry() {
        let t = RouteStatsTable::new();
        assert!(t.get("nobody").is_none());
    }

    #[test]
    fn snapshot_reports_every_tracked_neighbor() {
        let t = RouteStatsTable::new();
        t.record_success("C");
        t.record_failure("D");
        let snap = t.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["C"].reward, REWARD_SUCCESS);
        assert_eq!(snap["D"].reward, REWARD_FAILURE);
    }
}
