//! PacketCodec: the canonical packet struct plus its wire encoding,
//! checksum, and structural validation.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_WIRE_BYTES: usize = 65_536;
pub const MAX_TTL: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    Sos,
    Ack,
    Status,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    pub const NORMAL: Priority = Priority(0);
    pub const CRITICAL: Priority = Priority(3);

    /// priority >= 3 is treated as SOS-class for retry policy, independent
    /// of `PacketType` — a `Data` packet marked priority 3 still gets SOS retries.
    pub fn is_sos_class(self) -> bool {
        self.0 >= 3
    }
}

/// Wire-format mirror of `Packet`. Field names MUST match exactly for
/// interop with other implementations of this protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePacket {
    id: String,
    #[serde(rename = "originatorId")]
    originator_id: String,
    payload: String,
    trace: Vec<String>,
    ttl: u32,
    timestamp: i64,
    priority: u8,
    #[serde(rename = "packetType")]
    packet_type: PacketType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub id: String,
    pub originator_id: String,
    pub packet_type: PacketType,
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub trace: Vec<String>,
    pub ttl: u32,
    pub created_at: i64,
}

impl Packet {
    pub fn new(
        id: impl Into<String>,
        originator_id: impl Into<String>,
        packet_type: PacketType,
        priority: Priority,
        payload: Vec<u8>,
        ttl: u32,
        created_at: i64,
    ) -> Self {
        let originator_id = originator_id.into();
        Self {
            id: id.into(),
            trace: vec![originator_id.clone()],
            originator_id,
            packet_type,
            priority,
            payload,
            ttl,
            created_at,
        }
    }

    pub fn is_sos(&self) -> bool {
        self.packet_type == PacketType::Sos || self.priority.is_sos_class()
    }

    pub fn has_visited(&self, node_id: &str) -> bool {
        self.trace.iter().any(|n| n == node_id)
    }

    pub fn last_hop(&self) -> Option<&str> {
        self.trace.last().map(|s| s.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("packet of {0} bytes exceeds the {MAX_WIRE_BYTES} byte wire limit")]
    Oversized(usize),
}

fn validate_structure(p: &Packet) -> Result<(), DecodeError> {
    if p.trace.first().map(|s| s.as_str()) != Some(p.originator_id.as_str()) {
        return Err(DecodeError::Malformed(
            "first(trace) must equal originator_id".into(),
        ));
    }
    let mut seen = std::collections::HashSet::with_capacity(p.trace.len());
    for node in &p.trace {
        if node.is_empty() {
            return Err(DecodeError::Malformed("trace contains an empty node id".into()));
        }
        if !seen.insert(node.as_str()) {
            return Err(DecodeError::Malformed(format!("trace contains a loop at {node}")));
        }
    }
    if p.ttl > MAX_TTL {
        return Err(DecodeError::Malformed(format!("ttl {} exceeds max {MAX_TTL}", p.ttl)));
    }
    Ok(())
}

/// Encodes a packet as wire JSON, optionally base64-wrapped for
/// bandwidth-constrained transports.
pub fn encode(packet: &Packet, base64_wrap: bool) -> Result<Vec<u8>, DecodeError> {
    validate_structure(packet)?;
    let wire = WirePacket {
        id: packet.id.clone(),
        originator_id: packet.originator_id.clone(),
        payload: base64::engine::general_purpose::STANDARD.encode(&packet.payload),
        trace: packet.trace.clone(),
        ttl: packet.ttl,
        timestamp: packet.created_at,
        priority: packet.priority.0,
        packet_type: packet.packet_type,
    };
    let json = serde_json::to_vec(&wire).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if json.len() > MAX_WIRE_BYTES {
        return Err(DecodeError::Oversized(json.len()));
    }
    let bytes = if base64_wrap {
        base64::engine::general_purpose::STANDARD
            .encode(&json)
            .into_bytes()
    } else {
        json
    };
    if bytes.len() > MAX_WIRE_BYTES {
        return Err(DecodeError::Oversized(bytes.len()));
    }
    Ok(bytes)
}

/// Decodes wire bytes into a `Packet`, enforcing every structural
/// invariant before returning — callers never see a structurally invalid
/// `Packet`.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.len() > MAX_WIRE_BYTES {
        return Err(DecodeError::Oversized(bytes.len()));
    }
    let json: Vec<u8> = match serde_json::from_slice::<WirePacket>(bytes) {
        Ok(_) => bytes.to_vec(),
        Err(_) => base64::engine::general_purpose::STANDARD
            .decode(bytes)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?,
    };
    let wire: WirePacket =
        serde_json::from_slice(&json).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(wire.payload.as_bytes())
        .map_err(|e| DecodeError::Malformed(format!("payload not valid base64: {e}")))?;
    let packet = Packet {
        id: wire.id,
        originator_id: wire.originator_id,
        packet_type: wire.packet_type,
        priority: Priority(wire.priority),
        payload,
        trace: wire.trace,
        ttl: wire.ttl,
        created_at: wire.timestamp,
    };
    validate_structure(&packet)?;
    Ok(packet)
}

/// Non-cryptographic 32-bit additive checksum over the serialized wire form,
/// exposed for integrity logging only — NOT a security primitive.
pub fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}
