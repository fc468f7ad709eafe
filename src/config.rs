//! Ambient configuration layer. Every numeric constant the routing and
//! relay logic needs lives here with a documented default, overridable by
//! the embedding app rather than baked in as a bare `const`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SeenCache in-memory capacity.
    pub seen_cache_capacity: usize,
    /// Normal-packet retry ceiling. MUST equal `max_consecutive_failures`.
    pub max_retries: u32,
    /// SOS-class retry ceiling.
    pub max_sos_retries: u32,
    /// Outbox TTL for normal packets.
    pub outbox_ttl_normal: Duration,
    /// Outbox TTL for SOS packets.
    pub outbox_ttl_sos: Duration,
    /// Neighbor staleness window. MUST equal 2x discovery refresh.
    pub stale_timeout: Duration,
    /// Stale-node sweep cadence.
    pub node_sweep_interval: Duration,
    /// Outbox-expiry sweep cadence.
    pub outbox_sweep_interval: Duration,
    /// Relay tick cadence.
    pub relay_interval: Duration,
    /// Mandatory post-send sleep.
    pub post_send_blackout: Duration,
    /// Consecutive-failure threshold before pausing the drain loop.
    pub max_consecutive_failures: u32,
    /// Drain-loop pause duration once tripped.
    pub pause_duration: Duration,
    /// Transport connect deadline.
    pub connect_timeout: Duration,
    /// Shutdown grace period.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seen_cache_capacity: 1000,
            max_retries: 3,
            max_sos_retries: 10,
            outbox_ttl_normal: Duration::from_secs(3600),
            outbox_ttl_sos: Duration::from_secs(600),
            stale_timeout: Duration::from_secs(120),
            node_sweep_interval: Duration::from_secs(30),
            outbox_sweep_interval: Duration::from_secs(60),
            relay_interval: Duration::from_secs(10),
            post_send_blackout: Duration::from_millis(500),
            max_consecutive_failures: 3,
            pause_duration: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Panics in debug builds if the cross-component invariant is violated:
    /// a paused orchestrator must not be outrun by a packet still eligible
    /// for more retries than the system will ever attempt.
    pub fn assert_consistent(&self) {
        debug_assert_eq!(
            self.max_retries, self.max_consecutive_failures,
            "max_retries must equal max_consecutive_failures"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_retry_pause_invariant() {
        let cfg = EngineConfig::default();
        cfg.assert_consistent();
        assert_eq!(cfg.max_retries, cfg.max_consecutive_failures);
    }

    #[test]
    fn stale_timeout_is_double_a_plausible_refresh_window() {
        let cfg = EngineConfig::default();
        let refresh = Duration::from_secs(60);
        assert_eq!(cfg.stale_timeout, refresh * 2);
    }
}
