//! IngressProcessor: classifies inbound packets as drop / deliver /
//! forward.

use crate::outbox::Outbox;
use crate::packet::Packet;
use crate::seen_cache::SeenCache;
use crate::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    Invalid,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngressOutcome {
    Drop(DropReason),
    /// Hand to the cloud uploader (this node is a goal node for this SOS).
    Deliver(Packet),
    /// Enqueued into the outbox for relay to the next hop.
    Forward,
}

/// Runs the full ingress pipeline in order. `self_id` is appended to the
/// trace only on the forward path.
pub fn process(
    seen: &mut dyn SeenCache,
    outbox: &mut Outbox,
    mut packet: Packet,
    self_id: &str,
    self_has_internet: bool,
    now: i64,
) -> crate::error::EngineResult<IngressOutcome> {
    if !seen.check_and_insert(&packet.id)? {
        tracing::info!(id = %packet.id, "ingress_drop_duplicate");
        return Ok(IngressOutcome::Drop(DropReason::Duplicate));
    }

    if trace::validate(&packet).is_err() {
        tracing::warn!(id = %packet.id, "ingress_drop_invalid");
        return Ok(IngressOutcome::Drop(DropReason::Invalid));
    }

    if self_has_internet && packet.is_sos() {
        tracing::info!(id = %packet.id, "ingress_deliver");
        return Ok(IngressOutcome::Deliver(packet));
    }

    if packet.ttl == 0 {
        tracing::info!(id = %packet.id, "ingress_drop_expired");
        return Ok(IngressOutcome::Drop(DropReason::Expired));
    }

    // Appending self would otherwise create a duplicate trace entry (a
    // loop) — drop rather than forward a packet that already visited us.
    if packet.has_visited(self_id) {
        tracing::warn!(id = %packet.id, self_id, "ingress_drop_invalid_self_in_trace");
        return Ok(IngressOutcome::Drop(DropReason::Invalid));
    }

    packet.trace.push(self_id.to_string());
    packet.ttl -= 1;
    outbox.enqueue(packet, now)?;
    Ok(IngressOutcome::Forward)
}
