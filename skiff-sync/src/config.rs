//! Synchronizer configuration.

use std::time::Duration;

/// Tunables for one synchronizer instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between heartbeat ticks (presence rebroadcast + TTL
    /// sweep).
    pub heartbeat_interval: Duration,
    /// Presence entries older than this are swept.
    pub ephemeral_ttl: Duration,
    /// Hop budget stamped on locally originated presence messages.
    pub ephemeral_hops: u32,
    /// Default bound for `wait_for_sync`; zero disables the bound.
    pub wait_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(3),
            ephemeral_ttl: Duration::from_secs(30),
            ephemeral_hops: 2,
            wait_timeout: Duration::from_secs(30),
        }
    }
}
