//! Node configuration for the standalone monitor

use alloy_primitives::Bytes;
use eyre::WrapErr;
use permia_heartbeat::{HeartbeatConfig, HeartbeatLimits};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};

/// Public keys per shard, shard ids as strings since TOML keys are strings
pub(crate) type ShardMap = BTreeMap<String, Vec<Bytes>>;

/// Configuration file layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct NodeConfig {
    /// How often the liveness report is printed
    #[serde(with = "humantime_serde")]
    pub(crate) report_interval: Duration,
    /// Eligible validators per shard
    pub(crate) eligible: ShardMap,
    /// Waiting validators per shard
    pub(crate) waiting: ShardMap,
    /// Heartbeat decoder limits
    pub(crate) limits: HeartbeatLimits,
    /// Monitor settings
    pub(crate) heartbeat: HeartbeatConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(30),
            eligible: BTreeMap::from([(
                "0".to_owned(),
                vec![Bytes::from_static(b"permia-dev-validator")],
            )]),
            waiting: BTreeMap::new(),
            limits: HeartbeatLimits::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Read and parse a TOML configuration file
    pub(crate) fn load(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).wrap_err_with(|| format!("invalid config {}", path.display()))
    }

    /// Parse a TOML configuration
    pub(crate) fn from_toml_str(raw: &str) -> eyre::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Eligible validators keyed by numeric shard id
    pub(crate) fn eligible_nodes(&self) -> eyre::Result<BTreeMap<u32, Vec<Bytes>>> {
        parse_shards(&self.eligible)
    }

    /// Waiting validators keyed by numeric shard id
    pub(crate) fn waiting_nodes(&self) -> eyre::Result<BTreeMap<u32, Vec<Bytes>>> {
        parse_shards(&self.waiting)
    }

    /// Every eligible and waiting key, tracked from start-up
    pub(crate) fn initial_nodes(&self) -> eyre::Result<BTreeMap<u32, Vec<Bytes>>> {
        let mut nodes = self.eligible_nodes()?;
        for (shard, keys) in self.waiting_nodes()? {
            nodes.entry(shard).or_default().extend(keys);
        }
        Ok(nodes)
    }
}

fn parse_shards(map: &ShardMap) -> eyre::Result<BTreeMap<u32, Vec<Bytes>>> {
    map.iter()
        .map(|(shard, keys)| {
            let shard = shard.parse().wrap_err_with(|| format!("invalid shard id {shard:?}"))?;
            Ok((shard, keys.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shard_maps() {
        let config = NodeConfig::from_toml_str(
            r#"
            report_interval = "5s"

            [eligible]
            0 = ["0xaa", "0xbb"]
            1 = ["0xcc"]

            [waiting]
            0 = ["0xdd"]

            [heartbeat]
            max_duration_peer_unresponsive = "1m"
            "#,
        )
        .unwrap();

        assert_eq!(config.report_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat.max_duration_peer_unresponsive, Duration::from_secs(60));

        let nodes = config.initial_nodes().unwrap();
        assert_eq!(nodes[&0].len(), 3);
        assert_eq!(nodes[&1], vec![Bytes::from_static(&[0xcc])]);
        assert_eq!(config.waiting_nodes().unwrap()[&0], vec![Bytes::from_static(&[0xdd])]);
    }

    #[test]
    fn rejects_non_numeric_shard() {
        let config = NodeConfig::from_toml_str(
            r#"
            [eligible]
            meta = ["0xaa"]
            "#,
        )
        .unwrap();
        assert!(config.eligible_nodes().is_err());
    }
}
