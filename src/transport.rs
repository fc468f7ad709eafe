//! Inbound collaborator interfaces. The engine depends only on these
//! traits, never a concrete platform implementation — Wi-Fi Direct, GPS,
//! battery, connectivity probing, and cloud upload are all out of scope
//! and are wired in by the embedding application.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::error::EngineResult;
use crate::node_table::NodeInfo;
use crate::packet::Packet;

#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionResult {
    pub success: bool,
    pub target: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl TransmissionResult {
    pub fn ok(target: impl Into<String>) -> Self {
        Self { success: true, target: target.into(), error_code: None, error_message: None }
    }

    pub fn failure(target: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            target: target.into(),
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// The platform-native Wi-Fi Direct (or equivalent) link-layer driver.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_mesh_node(&self, node_id: &str, metadata: HashMap<String, String>) -> EngineResult<()>;
    async fn update_metadata(&self, metadata: HashMap<String, String>) -> EngineResult<()>;
    async fn connect_and_send(&self, device_address: &str, bytes: Vec<u8>) -> EngineResult<TransmissionResult>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn has_internet(&self) -> bool;

    /// Pushes a new value each time internet reachability changes. The
    /// coordinator consumes this directly instead of polling `has_internet`.
    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = bool> + Send>>;
}

#[async_trait]
pub trait CloudUploader: Send + Sync {
    async fn upload(&self, packet: &Packet) -> EngineResult<()>;
}

#[async_trait]
pub trait BatteryReader: Send + Sync {
    async fn level(&self) -> u8;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current(&self) -> Option<Location>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Events arriving from `Transport`, modeled as typed messages on a
/// bounded channel rather than closures capturing mutable state.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    NeighborsChanged(Vec<NodeInfo>),
    PacketReceived(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmission_result_helpers() {
        let ok = TransmissionResult::ok("addr-1");
        assert!(ok.success);
        let fail = TransmissionResult::failure("addr-1", "timeout", "deadline exceeded");
        assert!(!fail.success);
        assert_eq!(fail.error_code.as_deref(), Some("timeout"));
    }

    #[test]
    fn system_clock_returns_increasing_values() {
        let c = SystemClock;
        let a = c.now_ms();
        let b = c.now_ms();
        assert!(b >= a);
    }
}
