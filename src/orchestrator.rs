//! RelayOrchestrator: the drain loop. The most subtle component — it
//! coordinates the Scorer, Outbox, NodeTable, and Transport while
//! enforcing the SOS transient-failure policy and the consecutive-failure
//! pause guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::metrics::Metrics;
use crate::node_table::NodeTable;
use crate::outbox::Outbox;
use crate::packet::Packet;
use crate::route_stats::RouteStatsTable;
use crate::scorer;
use crate::transport::{CloudUploader, Transport};

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    NoCandidate,
    Sending { packet_id: String, target: String },
    Success { packet_id: String, target: String },
    Failure { packet_id: String, reason: String },
    Paused,
    Resumed,
}

pub struct RelayOrchestrator<T: Transport, U: CloudUploader> {
    pub self_id: String,
    pub outbox: Arc<Mutex<Outbox>>,
    pub node_table: Arc<RwLock<NodeTable>>,
    pub transport: Arc<T>,
    pub cloud_uploader: Arc<U>,
    pub metrics: Arc<Metrics>,
    pub config: EngineConfig,
    pub events: tokio::sync::broadcast::Sender<OrchestratorEvent>,
    pub route_stats: Arc<RouteStatsTable>,
}

impl<T: Transport, U: CloudUploader> RelayOrchestrator<T, U> {
    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// Runs one tick of the drain loop. `self_has_internet` reflects the
    /// connectivity probe state sampled at tick start.
    pub async fn tick(&self, self_has_internet: bool, now: i64) -> crate::error::EngineResult<()> {
        // Local-delivery hook: if this node just gained internet and there
        // are pending SOS packets, bypass transport entirely.
        if self_has_internet {
            self.deliver_pending_sos_locally(now).await?;
        }

        if self.metrics.is_paused() {
            return Ok(());
        }

        let neighbors_snapshot: Vec<crate::node_table::NodeInfo> = {
            let table = self.node_table.read().await;
            table.all_fresh(now).into_iter().cloned().collect()
        };

        let outbox_empty = {
            let ob = self.outbox.lock().await;
            ob.is_empty()?
        };

        if neighbors_snapshot.is_empty() {
            if !outbox_empty {
                self.emit(OrchestratorEvent::NoCandidate);
                self.fail_all_pending_sos_as_transient(now).await?;
            }
            return Ok(());
        }

        let packet = {
            let ob = self.outbox.lock().await;
            ob.next_pending()?
        };
        let Some(packet) = packet else {
            return Ok(());
        };

        let neighbor_refs: Vec<&crate::node_table::NodeInfo> = neighbors_snapshot.iter().collect();
        let target = scorer::best_candidate(&packet, &neighbor_refs, now, self.config.stale_timeout);

        let Some(target) = target else {
            let mut ob = self.outbox.lock().await;
            if packet.is_sos() {
                ob.mark_failed(&packet.id, true, now)?;
            } else {
                ob.mark_failed(&packet.id, false, now)?;
                self.metrics.record_failed();
            }
            return Ok(());
        };
        let target_id = target.id.clone();
        let target_address = target.device_address.clone();

        {
            let mut ob = self.outbox.lock().await;
            ob.mark_in_progress(&packet.id)?;
        }

        self.emit(OrchestratorEvent::Sending { packet_id: packet.id.clone(), target: target_id.clone() });

        let encoded = crate::packet::encode(&packet, false)?;
        let send_result = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect_and_send(&target_address, encoded),
        )
        .await;

        match send_result {
            Ok(Ok(result)) if result.success => {
                let mut ob = self.outbox.lock().await;
                ob.mark_sent(&packet.id)?;
                self.metrics.record_sent();
                self.metrics.set_paused(false);
                self.route_stats.record_success(&target_id);
                self.emit(OrchestratorEvent::Success { packet_id: packet.id.clone(), target: target_id });
            }
            Ok(Ok(result)) => {
                let mut ob = self.outbox.lock().await;
                ob.mark_failed(&packet.id, false, now)?;
                self.metrics.record_failed();
                self.route_stats.record_failure(&target_id);
                self.emit(OrchestratorEvent::Failure {
                    packet_id: packet.id.clone(),
                    reason: result.error_message.unwrap_or_else(|| "send_failed".into()),
                });
            }
            Ok(Err(e)) => {
                let mut ob = self.outbox.lock().await;
                ob.mark_failed(&packet.id, false, now)?;
                self.metrics.record_failed();
                self.route_stats.record_failure(&target_id);
                self.emit(OrchestratorEvent::Failure { packet_id: packet.id.clone(), reason: e.to_string() });
            }
            Err(_elapsed) => {
                let mut ob = self.outbox.lock().await;
                ob.mark_failed(&packet.id, false, now)?;
                self.metrics.record_failed();
                self.route_stats.record_failure(&target_id);
                self.emit(OrchestratorEvent::Failure { packet_id: packet.id.clone(), reason: "timeout".into() });
            }
        }

        if self.metrics.consecutive_failures() >= self.config.max_consecutive_failures as u64 {
            self.metrics.set_paused(true);
            self.emit(OrchestratorEvent::Paused);
        }

        // Back-pressure: the native transport tears down the group after
        // any send attempt, so discovery is briefly unavailable.
        tokio::time::sleep(self.config.post_send_blackout).await;

        Ok(())
    }

    async fn fail_all_pending_sos_as_transient(&self, now: i64) -> crate::error::EngineResult<()> {
        let mut ob = self.outbox.lock().await;
        let entries = ob.all_entries()?;
        for entry in entries {
            if entry.packet.is_sos() && entry.status == crate::outbox::OutboxStatus::Pending {
                ob.mark_failed(&entry.packet.id, true, now)?;
            }
        }
        Ok(())
    }

    async fn deliver_pending_sos_locally(&self, now: i64) -> crate::error::EngineResult<()> {
        let sos_packets: Vec<Packet> = {
            let ob = self.outbox.lock().await;
            ob.all_entries()?
                .into_iter()
                .filter(|e| e.packet.is_sos() && e.status == crate::outbox::OutboxStatus::Pending)
                .map(|e| e.packet)
                .collect()
        };
        for packet in sos_packets {
            match self.cloud_uploader.upload(&packet).await {
                Ok(()) => {
                    let mut ob = self.outbox.lock().await;
                    ob.mark_sent(&packet.id)?;
                    self.metrics.record_sent();
                }
                Err(e) => {
                    tracing::warn!(id = %packet.id, error = %e, "local_delivery_upload_failed");
                    let mut ob = self.outbox.lock().await;
                    ob.mark_failed(&packet.id, true, now)?;
                }
            }
        }
        Ok(())
    }

    /// Drives ticks on `RELAY_INTERVAL` cadence until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        mut connectivity: tokio::sync::watch::Receiver<bool>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
        clock: Arc<dyn crate::transport::Clock>,
    ) {
        let mut interval = tokio::time::interval(self.config.relay_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.metrics.is_paused() {
                        continue;
                    }
                    let has_internet = *connectivity.borrow();
                    let now = clock.now_ms();
                    if let Err(e) = self.tick(has_internet, now).await {
                        tracing::error!(error = %e, "relay_tick_failed");
                    }
                }
                _ = sleep_until_pause_expires(&self.metrics, self.config.pause_duration) => {
                    self.metrics.set_paused(false);
                    self.emit(OrchestratorEvent::Resumed);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Resolves after `pause_duration` only while the orchestrator is paused;
/// otherwise never resolves, so it does not race a normal tick.
async fn sleep_until_pause_expires(metrics: &Metrics, pause_duration: Duration) {
    if !metrics.is_paused() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(pause_duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_table::{NodeInfo, NodeRole, TriageLevel};
    use crate::packet::{PacketType, Priority};
    use crate::transport::TransmissionResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        succeed: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn start_mesh_node(&self, _: &str, _: HashMap<String, String>) -> crate::error::EngineResult<()> {
            Ok(())
        }
        async fn update_metadata(&self, _: HashMap<String, String>) -> crate::error::EngineResult<()> {
            Ok(())
        }
        async fn connect_and_send(&self, target: &str, _: Vec<u8>) -> crate::error::EngineResult<TransmissionResult> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(if self.succeed {
                TransmissionResult::ok(target)
            } else {
                TransmissionResult::failure(target, "refused", "busy")
            })
        }
    }

    struct MockUploader {
        uploaded: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudUploader for MockUploader {
        async fn upload(&self, packet: &Packet) -> crate::error::EngineResult<()> {
            self.uploaded.lock().unwrap().push(packet.id.clone());
            Ok(())
        }
    }

    fn neighbor(id: &str) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            device_address: format!("addr-{id}"),
            display_name: id.to_string(),
            battery_level: 80,
            has_internet: true,
            latitude: 0.0,
            longitude: 0.0,
            last_seen: 1000,
            signal_strength: -50,
            triage_level: TriageLevel::None,
            role: NodeRole::Relay,
            available_for_relay: true,
        }
    }

    async fn build(succeed: bool) -> (tempfile::TempDir, Arc<RelayOrchestrator<MockTransport, MockUploader>>) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut cfg = EngineConfig::default();
        cfg.post_send_blackout = Duration::from_millis(0);
        let outbox = Outbox::init(&db, cfg.max_retries, cfg.max_sos_retries, cfg.outbox_ttl_normal, cfg.outbox_ttl_sos).unwrap();
        let (tx, _rx) = tokio::sync::broadcast::channel(16);
        let orch = RelayOrchestrator {
            self_id: "A".into(),
            outbox: Arc::new(Mutex::new(outbox)),
            node_table: Arc::new(RwLock::new(NodeTable::new(cfg.stale_timeout))),
            transport: Arc::new(MockTransport { succeed, calls: AtomicUsize::new(0) }),
            cloud_uploader: Arc::new(MockUploader { uploaded: std::sync::Mutex::new(vec![]) }),
            metrics: Arc::new(Metrics::new()),
            config: cfg,
            events: tx,
            route_stats: Arc::new(RouteStatsTable::new()),
        };
        (dir, Arc::new(orch))
    }

    #[tokio::test]
    async fn s5_sos_transient_retries_when_no_neighbors() {
        let (_dir, orch) = build(true).await;
        {
            let mut ob = orch.outbox.lock().await;
            ob.enqueue(Packet::new("s1", "B", PacketType::Sos, Priority::CRITICAL, vec![], 5, 0), 0).unwrap();
        }
        for i in 0..5 {
            orch.tick(false, i).await.unwrap();
        }
        let entry = {
            let ob = orch.outbox.lock().await;
            ob.all_entries().unwrap().into_iter().find(|e| e.packet.id == "s1").unwrap()
        };
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.status, crate::outbox::OutboxStatus::Pending);
        assert!(entry.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn successful_send_marks_sent_and_resets_failures() {
        let (_dir, orch) = build(true).await;
        {
            let mut ob = orch.outbox.lock().await;
            ob.enqueue(Packet::new("p1", "B", PacketType::Data, Priority::NORMAL, vec![], 5, 0), 0).unwrap();
        }
        {
            let mut table = orch.node_table.write().await;
            table.upsert(neighbor("C"));
        }
        orch.tick(false, 0).await.unwrap();
        let entries = {
            let ob = orch.outbox.lock().await;
            ob.all_entries().unwrap()
        };
        assert_eq!(entries[0].status, crate::outbox::OutboxStatus::Sent);
        assert_eq!(orch.metrics.consecutive_failures(), 0);
        assert_eq!(orch.route_stats.get("C").unwrap().reward, crate::route_stats::REWARD_SUCCESS);
    }

    #[tokio::test]
    async fn failed_send_penalizes_the_target_in_route_stats() {
        let (_dir, orch) = build(false).await;
        {
            let mut ob = orch.outbox.lock().await;
            ob.enqueue(Packet::new("p1", "B", PacketType::Data, Priority::NORMAL, vec![], 5, 0), 0).unwrap();
        }
        {
            let mut table = orch.node_table.write().await;
            table.upsert(neighbor("C"));
        }
        orch.tick(false, 0).await.unwrap();
        let stats = orch.route_stats.get("C").unwrap();
        assert_eq!(stats.reward, crate::route_stats::REWARD_FAILURE);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_pause_guard() {
        let (_dir, orch) = build(false).await;
        {
            let mut table = orch.node_table.write().await;
            table.upsert(neighbor("C"));
        }
        for i in 0..3u32 {
            let mut ob = orch.outbox.lock().await;
            ob.enqueue(Packet::new(&format!("p{i}"), "B", PacketType::Data, Priority::NORMAL, vec![], 5, 0), i as i64).unwrap();
            drop(ob);
            orch.tick(false, i as i64).await.unwrap();
        }
        assert!(orch.metrics.is_paused());
    }

    #[tokio::test]
    async fn internet_gained_mid_flight_delivers_sos_locally() {
        let (_dir, orch) = build(true).await;
        {
            let mut ob = orch.outbox.lock().await;
            ob.enqueue(Packet::new("s1", "B", PacketType::Sos, Priority::CRITICAL, vec![], 5, 0), 0).unwrap();
        }
        orch.tick(true, 0).await.unwrap();
        let uploaded = orch.cloud_uploader.uploaded.lock().unwrap().clone();
        assert_eq!(uploaded, vec!["s1".to_string()]);
        let entries = {
            let ob = orch.outbox.lock().await;
            ob.all_entries().unwrap()
        };
        assert_eq!(entries[0].status, crate::outbox::OutboxStatus::Sent);
    }
}
