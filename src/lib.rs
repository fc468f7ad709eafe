//! Sinyalist mesh relay engine — the per-node packet model, durable
//! outbox, duplicate/loop detection, AI scoring router, relay
//! orchestrator, and ingress processor that together implement the
//! offline peer-to-peer emergency messaging mesh.
//!
//! GUI rendering, the platform Wi-Fi Direct driver, GPS/battery sensors,
//! connectivity probing, cloud upload transport, and permission prompting
//! are all out of scope — this crate depends on them only through the
//! collaborator traits in [`transport`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ingress;
pub mod metrics;
pub mod node_table;
pub mod orchestrator;
pub mod outbox;
pub mod packet;
pub mod route_stats;
pub mod scorer;
pub mod seen_cache;
pub mod storage;
pub mod trace;
pub mod transport;

pub use config::EngineConfig;
pub use coordinator::MeshCoordinator;
pub use error::{EngineError, EngineResult};
pub use node_table::{NodeInfo, NodeRole, TriageLevel};
pub use packet::{Packet, PacketType, Priority};
pub use route_stats::RouteStats;

/// Initializes the crate's tracing subscriber for an embedding binary.
/// Embedders that already configure their own subscriber should not call
/// this.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "sinyalist_mesh_engine=info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
}
