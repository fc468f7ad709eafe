//! Scorer: pure `(packet, neighbor, self) -> f64` scoring function that
//! picks the best next hop. Every weight and penalty below is
//! authoritative — do not retune one without reconsidering the rest.

use crate::node_table::NodeInfo;
use crate::packet::Packet;

pub const W_INTERNET: f64 = 50.0;
pub const W_SOS_PRIORITY: f64 = 30.0;
pub const W_BATTERY: f64 = 25.0;
pub const W_SIGNAL: f64 = 10.0;
pub const BONUS_GOAL_ROLE: f64 = 15.0;
pub const BONUS_RELAY_ROLE: f64 = 5.0;
pub const P_STALE: f64 = -100.0;
pub const P_LOW_BATTERY: f64 = -20.0;
pub const LOW_BATTERY_THRESHOLD: u8 = 20;
pub const P_IN_TRACE: f64 = -1000.0;
pub const P_SENDER: f64 = -1000.0;
pub const MIN_VIABLE_SCORE: f64 = 0.0;

/// One named contribution to a score, in the order it was applied — used
/// for post-incident routing diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreComponent {
    pub name: &'static str,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreExplanation {
    pub total: f64,
    pub components: Vec<ScoreComponent>,
}

fn disqualified(
    packet: &Packet,
    neighbor: &NodeInfo,
) -> Option<(&'static str, f64)> {
    if packet.has_visited(&neighbor.id) {
        return Some(("in_trace", P_IN_TRACE));
    }
    if packet.last_hop() == Some(neighbor.id.as_str()) {
        return Some(("sender", P_SENDER));
    }
    if neighbor.id == packet.originator_id {
        return Some(("in_trace", P_IN_TRACE));
    }
    if !neighbor.available_for_relay {
        return Some(("unavailable", P_IN_TRACE));
    }
    None
}

/// Scores one neighbor as a relay candidate for `packet`, with a full
/// explanation of how the score was built.
pub fn score_explained(packet: &Packet, neighbor: &NodeInfo, now: i64, stale_timeout: std::time::Duration) -> ScoreExplanation {
    if let Some((name, value)) = disqualified(packet, neighbor) {
        return ScoreExplanation {
            total: value,
            components: vec![ScoreComponent { name, value }],
        };
    }

    let mut components = Vec::new();

    if neighbor.has_internet {
        components.push(ScoreComponent { name: "internet", value: W_INTERNET });
    }
    if packet.is_sos() && neighbor.has_internet {
        components.push(ScoreComponent { name: "sos_priority", value: W_SOS_PRIORITY });
        if neighbor.role == crate::node_table::NodeRole::Goal {
            components.push(ScoreComponent { name: "sos_goal_bonus", value: W_SOS_PRIORITY / 2.0 });
        }
    }
    components.push(ScoreComponent {
        name: "battery",
        value: W_BATTERY * neighbor.normalized_battery(),
    });
    components.push(ScoreComponent {
        name: "signal",
        value: W_SIGNAL * neighbor.normalized_signal(),
    });
    match neighbor.role {
        crate::node_table::NodeRole::Goal => {
            components.push(ScoreComponent { name: "goal_role_bonus", value: BONUS_GOAL_ROLE });
        }
        crate::node_table::NodeRole::Relay => {
            components.push(ScoreComponent { name: "relay_role_bonus", value: BONUS_RELAY_ROLE });
        }
        _ => {}
    }
    if neighbor.is_stale(now, stale_timeout) {
        components.push(ScoreComponent { name: "stale_penalty", value: P_STALE });
    }
    if neighbor.battery_level < LOW_BATTERY_THRESHOLD {
        components.push(ScoreComponent { name: "low_battery_penalty", value: P_LOW_BATTERY });
    }

    let total = components.iter().map(|c| c.value).sum();
    ScoreExplanation { total, components }
}

pub fn score(packet: &Packet, neighbor: &NodeInfo, now: i64, stale_timeout: std::time::Duration) -> f64 {
    score_explained(packet, neighbor, now, stale_timeout).total
}

/// Picks the highest-scoring neighbor above `MIN_VIABLE_SCORE`, or `None` if
/// no neighbor qualifies.
pub fn best_candidate<'a>(
    packet: &Packet,
    neighbors: &[&'a NodeInfo],
    now: i64,
    stale_timeout: std::time::Duration,
) -> Option<&'a NodeInfo> {
    neighbors
        .iter()
        .map(|n| (*n, score(packet, n, now, stale_timeout)))
        .filter(|(_, s)| *s > MIN_VIABLE_SCORE)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(n, _)| n)
}
