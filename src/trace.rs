//! TraceValidator: pure predicates over a packet's trace.

use crate::packet::Packet;

#[derive(Debug, Clone, PartialEq)]
pub struct TraceError {
    pub reason: String,
    pub offending_node: Option<String>,
}

pub fn has_loop(trace: &[String]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(trace.len());
    trace.iter().any(|n| !seen.insert(n.as_str()))
}

pub fn has_visited(packet: &Packet, node_id: &str) -> bool {
    packet.has_visited(node_id)
}

pub fn exceeded_max_hops(packet: &Packet, max: usize) -> bool {
    packet.trace.len() >= max
}

/// Validates: non-empty trace, first element equals `originator_id`, no
/// loops, no empty node ids.
pub fn validate(packet: &Packet) -> Result<(), TraceError> {
    if packet.trace.is_empty() {
        return Err(TraceError {
            reason: "trace is empty".into(),
            offending_node: None,
        });
    }
    if packet.trace.first().map(|s| s.as_str()) != Some(packet.originator_id.as_str()) {
        return Err(TraceError {
            reason: "first(trace) does not equal originator_id".into(),
            offending_node: packet.trace.first().cloned(),
        });
    }
    if let Some(empty) = packet.trace.iter().find(|n| n.is_empty()) {
        return Err(TraceError {
            reason: "trace contains an empty node id".into(),
            offending_node: Some(empty.clone()),
        });
    }
    let mut seen = std::collections::HashSet::with_capacity(packet.trace.len());
    for node in &packet.trace {
        if !seen.insert(node.as_str()) {
            return Err(TraceError {
                reason: "trace contains a loop".into(),
                offending_node: Some(node.clone()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketType, Priority};

    fn packet_with_trace(trace: Vec<&str>) -> Packet {
        let mut p = Packet::new(
            "p1",
            trace[0],
            PacketType::Sos,
            Priority::CRITICAL,
            vec![],
            5,
            0,
        );
        p.trace = trace.into_iter().map(|s| s.to_string()).collect();
        p
    }

    #[test]
    fn valid_trace_passes() {
        let p = packet_with_trace(vec!["B", "A"]);
        assert!(validate(&p).is_ok());
    }

    #[test]
    fn empty_trace_is_rejected() {
        let mut p = packet_with_trace(vec!["B"]);
        p.trace.clear();
        assert!(validate(&p).is_err());
    }

    #[test]
    fn mismatched_originator_is_rejected() {
        let mut p = packet_with_trace(vec!["B", "A"]);
        p.originator_id = "X".into();
        assert!(validate(&p).is_err());
    }

    #[test]
    fn looped_trace_is_rejected() {
        let p = packet_with_trace(vec!["B", "A", "C", "A"]);
        assert!(has_loop(&p.trace));
        assert!(validate(&p).is_err());
    }

    #[test]
    fn empty_node_id_is_rejected() {
        let p = packet_with_trace(vec!["B", ""]);
        assert!(validate(&p).is_err());
    }

    #[test]
    fn has_visited_checks_membership() {
        let p = packet_with_trace(vec!["B", "A"]);
        assert!(has_visited(&p, "A"));
        assert!(!has_visited(&p, "C"));
    }

    #[test]
    fn exceeded_max_hops_counts_trace_length() {
        let p = packet_with_trace(vec!["B", "A", "C"]);
        assert!(exceeded_max_hops(&p, 3));
        assert!(!exceeded_max_hops(&p, 4));
    }
}
