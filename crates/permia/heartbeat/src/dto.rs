//! Persisted and exported forms of a peer record

use crate::PeerType;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Persisted layout of one peer record. Instants are unix nanoseconds,
/// durations are nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatDto {
    /// Whether the peer was active at the last evaluation
    pub is_active: bool,
    /// Shard reported by the peer itself
    pub received_shard_id: u32,
    /// Shard resolved by the peer type provider
    pub computed_shard_id: u32,
    /// Advertised software version
    pub version_number: String,
    /// Advertised display name
    pub node_display_name: String,
    /// Resolved role
    pub peer_type: PeerType,
    /// Last heartbeat time
    pub time_stamp: i64,
    /// Unresponsiveness threshold
    pub max_inactive_time: i64,
    /// Accumulated uptime
    pub total_up_time: i64,
    /// Accumulated downtime
    pub total_down_time: i64,
    /// Accounting watermark
    pub last_uptime_downtime: i64,
    /// Network genesis time
    pub genesis_time: i64,
}

/// Point-in-time view of one peer, as served to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHeartbeat {
    /// Hex encoded public key, without prefix
    pub hex_public_key: String,
    /// Time of the last heartbeat
    #[serde(with = "humantime_serde")]
    pub time_stamp: SystemTime,
    /// Unresponsiveness threshold
    #[serde(with = "humantime_serde")]
    pub max_inactive_time: Duration,
    /// Whether the peer is considered alive
    pub is_active: bool,
    /// Shard reported by the peer
    pub received_shard_id: u32,
    /// Shard resolved by the peer type provider
    pub computed_shard_id: u32,
    /// Accumulated uptime in whole seconds
    pub total_up_time: i64,
    /// Accumulated downtime in whole seconds
    pub total_down_time: i64,
    /// Advertised software version
    pub version_number: String,
    /// Advertised display name
    pub node_display_name: String,
    /// Resolved role
    pub peer_type: PeerType,
}

/// Convert an instant to signed unix nanoseconds, saturating at the `i64` range.
pub(crate) fn to_unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => duration_to_nanos(after),
        Err(before) => duration_to_nanos(before.duration()).saturating_neg(),
    }
}

/// Inverse of [`to_unix_nanos`]
pub(crate) fn from_unix_nanos(nanos: i64) -> SystemTime {
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    if nanos >= 0 { UNIX_EPOCH + offset } else { UNIX_EPOCH - offset }
}

pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Negative stored durations are treated as zero.
pub(crate) fn nanos_to_duration(nanos: i64) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or_default())
}

/// Whole seconds, as exported in snapshots
pub(crate) fn whole_seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
