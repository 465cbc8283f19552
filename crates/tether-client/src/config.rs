//! Connection manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tether_protocol::{TetherError, TetherResult};

/// Timing and policy knobs for [`crate::ConnectionManager`].
///
/// Durations are (de)serialized as integer milliseconds; missing keys take
/// their defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bound on opening the transport
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,

    /// Bound on the handshake, tool calls and primitive listing
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,

    /// Bound on closing a session. A hung close never blocks a reconnect.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub close_timeout: Duration,

    /// Interval between health checks while connected
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub health_check_interval: Duration,

    /// Bound on a single health check (both probes)
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub health_check_timeout: Duration,

    /// A connection whose last passing health check is older than this is
    /// rebuilt before use
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub freshness_window: Duration,

    /// `is_connected()` schedules a background check past this age
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub very_stale_after: Duration,

    /// Interval of the periodic failure-count recovery
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub recovery_interval: Duration,

    /// Consecutive connect failures before connects fail fast
    pub max_consecutive_failures: u32,

    /// Lifetime of a cached primitives snapshot
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub primitives_ttl: Duration,

    /// Lifecycle events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            freshness_window: Duration::from_secs(90),
            very_stale_after: Duration::from_secs(120),
            recovery_interval: Duration::from_secs(60),
            max_consecutive_failures: 5,
            primitives_ttl: Duration::from_secs(300),
            event_capacity: 256,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects values the manager cannot run with.
    pub fn validate(&self) -> TetherResult<()> {
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("close_timeout", self.close_timeout),
            ("health_check_interval", self.health_check_interval),
            ("health_check_timeout", self.health_check_timeout),
            ("recovery_interval", self.recovery_interval),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(TetherError::configuration(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(TetherError::configuration(
                "max_consecutive_failures must be at least 1",
            ));
        }
        if self.event_capacity == 0 {
            return Err(TetherError::configuration(
                "event_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}
