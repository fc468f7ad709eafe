//! NodeTable: in-memory neighbor directory with staleness policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageLevel {
    None,
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Idle,
    Sender,
    Relay,
    Goal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub device_address: String,
    pub display_name: String,
    pub battery_level: u8,
    pub has_internet: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub last_seen: i64,
    pub signal_strength: i32,
    pub triage_level: TriageLevel,
    pub role: NodeRole,
    pub available_for_relay: bool,
}

impl NodeInfo {
    pub fn is_stale(&self, now: i64, stale_timeout: Duration) -> bool {
        let age_ms = now.saturating_sub(self.last_seen);
        age_ms > stale_timeout.as_millis() as i64
    }

    pub fn normalized_battery(&self) -> f64 {
        self.battery_level as f64 / 100.0
    }

    pub fn normalized_signal(&self) -> f64 {
        ((self.signal_strength + 100) as f64 / 100.0).clamp(0.0, 1.0)
    }
}

/// `id -> NodeInfo` directory. Single-writer (discovery listener),
/// multi-reader (scorer, UI) — the map itself is plain, not internally
/// locked; the owning task (or an outer `Arc<RwLock<_>>` at the coordinator
/// layer) provides the serialization.
#[derive(Default)]
pub struct NodeTable {
    nodes: HashMap<String, NodeInfo>,
    stale_timeout: Duration,
}

impl NodeTable {
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            stale_timeout,
        }
    }

    /// Replaces the entry by id. Never mutates an existing `NodeInfo` in
    /// place — discovery events always produce a fresh value.
    pub fn upsert(&mut self, node: NodeInfo) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &str) -> Option<&NodeInfo> {
        self.nodes.get(id)
    }

    pub fn all_fresh(&self, now: i64) -> Vec<&NodeInfo> {
        self.nodes
            .values()
            .filter(|n| !n.is_stale(now, self.stale_timeout))
            .collect()
    }

    pub fn all(&self) -> Vec<&NodeInfo> {
        self.nodes.values().collect()
    }

    /// Deletes every stale entry; returns the ids removed. Run every 30s.
    pub fn sweep(&mut self, now: i64) -> Vec<String> {
        let stale_ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.is_stale(now, self.stale_timeout))
            .map(|n| n.id.clone())
            .collect();
        for id in &stale_ids {
            self.nodes.remove(id);
        }
        stale_ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
