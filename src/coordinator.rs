//! MeshCoordinator: lifecycle, wiring, and the public API. Owns every
//! interior component as a composed field rather than resolving them
//! through a DI container — construction is explicit.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ingress::{self, IngressOutcome};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::node_table::NodeInfo;
use crate::orchestrator::{OrchestratorEvent, RelayOrchestrator};
use crate::outbox::Outbox;
use crate::packet::{Packet, PacketType, Priority};
use crate::route_stats::{RouteStats, RouteStatsTable};
use crate::seen_cache::{DurableSeenCache, SeenCache};
use crate::transport::{BatteryReader, Clock, CloudUploader, ConnectivityProbe, LocationProvider, SystemClock, Transport};

const SOS_ALERT_BROADCAST_CAPACITY: usize = 256;
const TELEMETRY_BROADCAST_CAPACITY: usize = 64;

pub struct MeshCoordinator<T: Transport + 'static, U: CloudUploader + 'static> {
    node_id: String,
    db: sled::Db,
    config: EngineConfig,
    outbox: Arc<Mutex<Outbox>>,
    node_table: Arc<RwLock<crate::node_table::NodeTable>>,
    seen_cache: Arc<Mutex<DurableSeenCache>>,
    metrics: Arc<Metrics>,
    route_stats: Arc<RouteStatsTable>,
    transport: Arc<T>,
    cloud_uploader: Arc<U>,
    connectivity_probe: Arc<dyn ConnectivityProbe>,
    battery_reader: Arc<dyn BatteryReader>,
    location_provider: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    connectivity_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    packets_tx: broadcast::Sender<Packet>,
    sos_alerts_tx: broadcast::Sender<Packet>,
    neighbors_tx: broadcast::Sender<Vec<NodeInfo>>,
    orchestrator_events_tx: broadcast::Sender<OrchestratorEvent>,
    current_node: Arc<RwLock<NodeInfo>>,
}

impl<T: Transport + 'static, U: CloudUploader + 'static> MeshCoordinator<T, U> {
    /// Startup order: Outbox.init (crash recovery runs here) -> NodeTable ->
    /// SeenCache -> orchestrator wiring. `Transport.start` is left to the
    /// caller's `start()` invocation.
    pub fn initialize(
        node_id: impl Into<String>,
        db_path: impl AsRef<std::path::Path>,
        config: EngineConfig,
        transport: Arc<T>,
        cloud_uploader: Arc<U>,
        connectivity_probe: Arc<dyn ConnectivityProbe>,
        battery_reader: Arc<dyn BatteryReader>,
        location_provider: Arc<dyn LocationProvider>,
    ) -> EngineResult<Self> {
        config.assert_consistent();
        let node_id = node_id.into();
        let db = sled::open(db_path)?;

        let outbox = Outbox::init(
            &db,
            config.max_retries,
            config.max_sos_retries,
            config.outbox_ttl_normal,
            config.outbox_ttl_sos,
        )?;
        let node_table = crate::node_table::NodeTable::new(config.stale_timeout);
        let seen_cache = DurableSeenCache::open(&db, config.seen_cache_capacity)?;

        let (connectivity_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        let (packets_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_CAPACITY);
        let (sos_alerts_tx, _) = broadcast::channel(SOS_ALERT_BROADCAST_CAPACITY);
        let (neighbors_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_CAPACITY);
        let (orchestrator_events_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_CAPACITY);

        let current_node = NodeInfo {
            id: node_id.clone(),
            device_address: String::new(),
            display_name: node_id.clone(),
            battery_level: 100,
            has_internet: false,
            latitude: 0.0,
            longitude: 0.0,
            last_seen: 0,
            signal_strength: -70,
            triage_level: crate::node_table::TriageLevel::None,
            role: crate::node_table::NodeRole::Idle,
            available_for_relay: true,
        };

        Ok(Self {
            node_id,
            db,
            config,
            outbox: Arc::new(Mutex::new(outbox)),
            node_table: Arc::new(RwLock::new(node_table)),
            seen_cache: Arc::new(Mutex::new(seen_cache)),
            metrics: Arc::new(Metrics::new()),
            route_stats: Arc::new(RouteStatsTable::new()),
            transport,
            cloud_uploader,
            connectivity_probe,
            battery_reader,
            location_provider,
            clock: Arc::new(SystemClock),
            connectivity_tx,
            shutdown_tx,
            packets_tx,
            sos_alerts_tx,
            neighbors_tx,
            orchestrator_events_tx,
            current_node: Arc::new(RwLock::new(current_node)),
        })
    }

    fn metadata_map(node: &NodeInfo) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("id".into(), node.id.clone());
        m.insert("bat".into(), node.battery_level.to_string());
        m.insert("net".into(), if node.has_internet { "1" } else { "0" }.into());
        m.insert("lat".into(), node.latitude.to_string());
        m.insert("lng".into(), node.longitude.to_string());
        m.insert("sig".into(), node.signal_strength.to_string());
        m.insert(
            "tri".into(),
            match node.triage_level {
                crate::node_table::TriageLevel::None => "n",
                crate::node_table::TriageLevel::Green => "g",
                crate::node_table::TriageLevel::Yellow => "y",
                crate::node_table::TriageLevel::Red => "r",
            }
            .into(),
        );
        m.insert(
            "rol".into(),
            match node.role {
                crate::node_table::NodeRole::Sender => "s",
                crate::node_table::NodeRole::Relay => "r",
                crate::node_table::NodeRole::Goal => "g",
                crate::node_table::NodeRole::Idle => "i",
            }
            .into(),
        );
        m.insert("rel".into(), if node.available_for_relay { "1" } else { "0" }.into());
        m
    }

    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        let metadata = Self::metadata_map(&*self.current_node.read().await);
        self.transport.start_mesh_node(&self.node_id, metadata).await?;

        let orchestrator = Arc::new(RelayOrchestrator {
            self_id: self.node_id.clone(),
            outbox: self.outbox.clone(),
            node_table: self.node_table.clone(),
            transport: self.transport.clone(),
            cloud_uploader: self.cloud_uploader.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            events: self.orchestrator_events_tx.clone(),
            route_stats: self.route_stats.clone(),
        });

        let connectivity_rx = self.connectivity_tx.subscribe();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let clock = self.clock.clone();
        tokio::spawn(orchestrator.run(connectivity_rx, shutdown_rx, clock));

        self.spawn_connectivity_probe();
        self.spawn_node_sweep();
        self.spawn_outbox_sweep();

        Ok(())
    }

    pub async fn stop(&self) -> EngineResult<()> {
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(self.config.shutdown_grace).await;
        Ok(())
    }

    fn spawn_connectivity_probe(self: &Arc<Self>) {
        let this = self.clone();
        let mut shutdown = this.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let last = this.connectivity_probe.has_internet().await;
            let _ = this.connectivity_tx.send(last);
            let mut changes = this.connectivity_probe.subscribe();
            loop {
                tokio::select! {
                    next = changes.next() => {
                        let Some(now) = next else { break };
                        let _ = this.connectivity_tx.send(now);
                        let mut node = this.current_node.write().await;
                        node.has_internet = now;
                        let metadata = Self::metadata_map(&node);
                        drop(node);
                        let _ = this.transport.update_metadata(metadata).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }

    fn spawn_node_sweep(self: &Arc<Self>) {
        let this = self.clone();
        let mut shutdown = this.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.node_sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = this.clock.now_ms();
                        let removed = this.node_table.write().await.sweep(now);
                        if !removed.is_empty() {
                            tracing::info!(count = removed.len(), "node_table_sweep");
                        }
                        let fresh: Vec<NodeInfo> = this.node_table.read().await.all_fresh(now).into_iter().cloned().collect();
                        let _ = this.neighbors_tx.send(fresh);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }

    fn spawn_outbox_sweep(self: &Arc<Self>) {
        let this = self.clone();
        let mut shutdown = this.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.outbox_sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = this.clock.now_ms();
                        match this.outbox.lock().await.expire(now) {
                            Ok(expired) if !expired.is_empty() => {
                                tracing::info!(count = expired.len(), "outbox_expiry_sweep");
                            }
                            Err(e) => tracing::error!(error = %e, "outbox_expiry_sweep_failed"),
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }

    pub async fn send_sos(&self, payload: Vec<u8>, originator_id: &str) -> EngineResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let packet = Packet::new(
            id.clone(),
            originator_id,
            PacketType::Sos,
            Priority::CRITICAL,
            payload,
            crate::packet::MAX_TTL,
            self.clock.now_ms(),
        );
        self.send_packet(packet).await?;
        Ok(id)
    }

    pub async fn send_packet(&self, packet: Packet) -> EngineResult<bool> {
        let now = self.clock.now_ms();
        self.outbox.lock().await.enqueue(packet, now)?;
        Ok(true)
    }

    /// Runs the ingress pipeline on a decoded inbound packet.
    pub async fn handle_inbound(&self, bytes: Vec<u8>) -> EngineResult<()> {
        let packet = crate::packet::decode(&bytes)?;
        let self_has_internet = self.current_node.read().await.has_internet;
        let now = self.clock.now_ms();

        let mut seen = self.seen_cache.lock().await;
        let mut outbox = self.outbox.lock().await;
        let outcome = ingress::process(&mut *seen, &mut outbox, packet, &self.node_id, self_has_internet, now)?;
        drop(outbox);
        drop(seen);

        match outcome {
            IngressOutcome::Drop(reason) => {
                self.metrics.record_drop(reason);
            }
            IngressOutcome::Deliver(packet) => {
                self.metrics.record_delivered();
                let _ = self.packets_tx.send(packet.clone());
                if packet.is_sos() {
                    let _ = self.sos_alerts_tx.send(packet.clone());
                }
                // The uploader must re-verify connectivity itself — a stale
                // has_internet flag must not cause silent loss.
                if self.connectivity_probe.has_internet().await {
                    self.cloud_uploader.upload(&packet).await?;
                } else {
                    self.outbox.lock().await.enqueue(packet, now)?;
                }
            }
            IngressOutcome::Forward => {
                self.metrics.record_forwarded();
            }
        }
        Ok(())
    }

    pub async fn handle_neighbors_changed(&self, neighbors: Vec<NodeInfo>) {
        let mut table = self.node_table.write().await;
        for n in neighbors {
            table.upsert(n);
        }
        let now = self.clock.now_ms();
        let fresh: Vec<NodeInfo> = table.all_fresh(now).into_iter().cloned().collect();
        drop(table);
        let _ = self.neighbors_tx.send(fresh);
    }

    pub fn subscribe_neighbors(&self) -> BroadcastStream<Vec<NodeInfo>> {
        BroadcastStream::new(self.neighbors_tx.subscribe())
    }

    pub fn subscribe_packets(&self) -> BroadcastStream<Packet> {
        BroadcastStream::new(self.packets_tx.subscribe())
    }

    pub fn subscribe_sos_alerts(&self) -> BroadcastStream<Packet> {
        BroadcastStream::new(self.sos_alerts_tx.subscribe())
    }

    pub fn subscribe_orchestrator_events(&self) -> BroadcastStream<OrchestratorEvent> {
        BroadcastStream::new(self.orchestrator_events_tx.subscribe())
    }

    pub async fn current_node(&self) -> NodeInfo {
        self.current_node.read().await.clone()
    }

    pub async fn update_metadata(&self, node_info: NodeInfo) -> EngineResult<()> {
        *self.current_node.write().await = node_info.clone();
        self.transport.update_metadata(Self::metadata_map(&node_info)).await
    }

    /// For the UI to compute excluded forward targets.
    pub async fn pending_packets(&self) -> EngineResult<Vec<Packet>> {
        Ok(self
            .outbox
            .lock()
            .await
            .all_entries()?
            .into_iter()
            .filter(|e| e.status != crate::outbox::OutboxStatus::Sent)
            .map(|e| e.packet)
            .collect())
    }

    pub async fn stats(&self) -> EngineResult<MetricsSnapshot> {
        let pending = self.outbox.lock().await.stats()?.pending;
        Ok(self.metrics.snapshot(pending))
    }

    /// Diagnostic-only per-neighbor reward snapshot; not fed back into the
    /// scorer.
    pub fn route_stats(&self) -> HashMap<String, RouteStats> {
        self.route_stats.snapshot()
    }

    pub async fn refresh_battery_and_location(&self) -> EngineResult<()> {
        let level = self.battery_reader.level().await;
        let location = self.location_provider.current().await;
        let mut node = self.current_node.write().await;
        node.battery_level = level;
        if let Some(loc) = location {
            node.latitude = loc.latitude;
            node.longitude = loc.longitude;
        }
        Ok(())
    }

    pub fn device_db(&self) -> &sled::Db {
        &self.db
    }
}
