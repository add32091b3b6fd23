//! Coordinator configuration.

use chrono::Duration;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address for health and metrics.
    pub http_bind_addr: String,

    /// How long a validated connection result whitelists a delegate.
    pub whitelist_ttl: Duration,

    /// Age after which a cached connection result is revalidated.
    pub revalidation_interval: Duration,

    /// Age after which a validated result is refreshed on dispatch.
    pub whitelist_refresh_interval: Duration,

    /// Heartbeat age after which a delegate no longer counts as connected.
    pub heartbeat_liveness: Duration,

    /// TTL of the per-account live-delegate list.
    pub account_delegates_ttl: Duration,

    /// Maximum number of accounts kept in the live-delegate cache.
    pub account_delegates_capacity: usize,

    /// TTL of cached connection results.
    pub connection_cache_ttl: Duration,

    /// Maximum number of cached connection results.
    pub connection_cache_capacity: usize,

    /// How often the barrier monitor scans standing barriers.
    pub barrier_monitor_interval: std::time::Duration,

    /// Concurrent barrier updates per monitor tick.
    pub barrier_monitor_workers: usize,

    /// This instance's slot in the cluster.
    pub partition_index: u32,

    /// Number of service instances sharing the monitor work.
    pub partition_count: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_addr: "[::1]:50080".to_string(),
            whitelist_ttl: Duration::hours(6),
            revalidation_interval: Duration::minutes(5),
            whitelist_refresh_interval: Duration::minutes(10),
            heartbeat_liveness: Duration::minutes(5) + Duration::seconds(15),
            account_delegates_ttl: Duration::minutes(1),
            account_delegates_capacity: 10_000,
            connection_cache_ttl: Duration::minutes(1),
            connection_cache_capacity: 100_000,
            barrier_monitor_interval: std::time::Duration::from_secs(60),
            barrier_monitor_workers: 2,
            partition_index: 0,
            partition_count: 1,
        }
    }
}
