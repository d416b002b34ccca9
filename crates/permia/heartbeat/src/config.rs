//! Heartbeat monitor configuration

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default gossip topic heartbeats are published on
pub const HEARTBEAT_TOPIC: &str = "heartbeat";

/// Default silence after which a peer is considered down
pub const DEFAULT_MAX_DURATION_PEER_UNRESPONSIVE: Duration = Duration::from_secs(120);

/// Default period of the background evaluation pass
pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration of the [`HeartbeatMonitor`](crate::HeartbeatMonitor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Silence after which a peer is marked inactive
    #[serde(with = "humantime_serde")]
    pub max_duration_peer_unresponsive: Duration,
    /// Period of [`HeartbeatMonitor::evaluation_task`](crate::HeartbeatMonitor::evaluation_task)
    #[serde(with = "humantime_serde")]
    pub evaluation_interval: Duration,
    /// Network genesis time, RFC 3339 in config files
    #[serde(with = "humantime_serde")]
    pub genesis_time: SystemTime,
    /// Gossip topic used for the topic scoped antiflood check
    pub topic: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            max_duration_peer_unresponsive: DEFAULT_MAX_DURATION_PEER_UNRESPONSIVE,
            evaluation_interval: DEFAULT_EVALUATION_INTERVAL,
            genesis_time: UNIX_EPOCH,
            topic: HEARTBEAT_TOPIC.to_owned(),
        }
    }
}

impl HeartbeatConfig {
    /// Parse a configuration from TOML
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Set the unresponsiveness threshold
    pub const fn with_max_duration_peer_unresponsive(mut self, duration: Duration) -> Self {
        self.max_duration_peer_unresponsive = duration;
        self
    }

    /// Set the genesis time
    pub const fn with_genesis_time(mut self, genesis_time: SystemTime) -> Self {
        self.genesis_time = genesis_time;
        self
    }

    /// Set the evaluation interval
    pub const fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }
}
