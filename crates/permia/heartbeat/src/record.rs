//! Per-peer liveness record and its accounting state machine.
//!
//! A record is either active or inactive. Receiving a heartbeat only updates
//! metadata and flips the record to active; uptime and downtime are credited
//! exclusively by [`PeerRecord::evaluate`], once per evaluation pass.

use crate::{
    dto::{
        duration_to_nanos, from_unix_nanos, nanos_to_duration, to_unix_nanos, whole_seconds,
        HeartbeatDto, PeerHeartbeat,
    },
    PeerType,
};
use alloy_primitives::{hex, Bytes};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Liveness and uptime history of a single public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    public_key: Bytes,
    is_active: bool,
    peer_type: PeerType,
    computed_shard_id: u32,
    received_shard_id: u32,
    version_number: String,
    node_display_name: String,
    time_stamp: SystemTime,
    max_inactive_time: Duration,
    total_up_time: Duration,
    total_down_time: Duration,
    last_uptime_downtime: SystemTime,
    genesis_time: SystemTime,
}

impl PeerRecord {
    /// Create an inactive record that has never sent a heartbeat.
    ///
    /// The time elapsed since genesis is credited as downtime so that the
    /// totals of a fresh record already cover the whole network lifetime.
    pub fn new(
        public_key: Bytes,
        max_inactive_time: Duration,
        peer_type: PeerType,
        computed_shard_id: u32,
        genesis_time: SystemTime,
        now: SystemTime,
    ) -> Self {
        Self {
            public_key,
            is_active: false,
            peer_type,
            computed_shard_id,
            received_shard_id: 0,
            version_number: String::new(),
            node_display_name: String::new(),
            time_stamp: UNIX_EPOCH,
            max_inactive_time,
            total_up_time: Duration::ZERO,
            total_down_time: elapsed(genesis_time, now),
            last_uptime_downtime: now,
            genesis_time,
        }
    }

    /// Apply a received heartbeat. Totals are left for the next evaluation.
    pub fn heartbeat_received(
        &mut self,
        now: SystemTime,
        computed_shard_id: u32,
        received_shard_id: u32,
        version_number: String,
        node_display_name: String,
        peer_type: PeerType,
    ) {
        self.time_stamp = now;
        self.is_active = true;
        self.computed_shard_id = computed_shard_id;
        self.received_shard_id = received_shard_id;
        self.version_number = version_number;
        self.node_display_name = node_display_name;
        self.peer_type = peer_type;
    }

    /// Recompute the active flag at `now` and credit the time since the last
    /// accounting step to uptime or downtime, according to the flag held
    /// before this call.
    ///
    /// Returns `true` if this call moved the record from active to inactive.
    pub fn evaluate(&mut self, now: SystemTime) -> bool {
        let was_active = self.is_active;
        self.credit_until(now);
        self.is_active = elapsed(self.time_stamp, now) < self.max_inactive_time;
        was_active && !self.is_active
    }

    /// Catch up accounting for a record loaded from storage, covering the
    /// time the node was not running.
    ///
    /// A peer that was active when persisted gets a fresh unresponsiveness
    /// window starting at `now`.
    pub fn resume(&mut self, now: SystemTime) {
        self.credit_until(now);
        if self.is_active {
            self.time_stamp = now;
        }
    }

    fn credit_until(&mut self, now: SystemTime) {
        let delta = elapsed(self.last_uptime_downtime, now);
        if self.is_active {
            self.total_up_time += delta;
        } else {
            self.total_down_time += delta;
        }
        self.last_uptime_downtime = self.last_uptime_downtime.max(now);
    }

    /// Public key this record belongs to
    pub const fn public_key(&self) -> &Bytes {
        &self.public_key
    }

    /// Whether the peer was alive at the last evaluation
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Whether the resolved role is a validator role
    pub const fn is_validator(&self) -> bool {
        self.peer_type.is_validator()
    }

    /// Resolved role
    pub const fn peer_type(&self) -> PeerType {
        self.peer_type
    }

    /// Shard resolved by the peer type provider
    pub const fn computed_shard_id(&self) -> u32 {
        self.computed_shard_id
    }

    /// Shard the peer reported itself
    pub const fn received_shard_id(&self) -> u32 {
        self.received_shard_id
    }

    /// Last heartbeat time, `UNIX_EPOCH` if none was ever received
    pub const fn time_stamp(&self) -> SystemTime {
        self.time_stamp
    }

    /// Accumulated uptime
    pub const fn total_up_time(&self) -> Duration {
        self.total_up_time
    }

    /// Accumulated downtime
    pub const fn total_down_time(&self) -> Duration {
        self.total_down_time
    }

    /// Instant up to which uptime and downtime have been credited
    pub const fn last_uptime_downtime(&self) -> SystemTime {
        self.last_uptime_downtime
    }

    /// Unresponsiveness threshold
    pub const fn max_inactive_time(&self) -> Duration {
        self.max_inactive_time
    }

    /// Replace the unresponsiveness threshold
    pub const fn set_max_inactive_time(&mut self, max_inactive_time: Duration) {
        self.max_inactive_time = max_inactive_time;
    }

    /// Replace the genesis time
    pub const fn set_genesis_time(&mut self, genesis_time: SystemTime) {
        self.genesis_time = genesis_time;
    }

    /// Replace the resolved role
    pub const fn set_peer_type(&mut self, peer_type: PeerType) {
        self.peer_type = peer_type;
    }

    /// Persisted form of this record
    pub fn to_dto(&self) -> HeartbeatDto {
        HeartbeatDto {
            is_active: self.is_active,
            received_shard_id: self.received_shard_id,
            computed_shard_id: self.computed_shard_id,
            version_number: self.version_number.clone(),
            node_display_name: self.node_display_name.clone(),
            peer_type: self.peer_type,
            time_stamp: to_unix_nanos(self.time_stamp),
            max_inactive_time: duration_to_nanos(self.max_inactive_time),
            total_up_time: duration_to_nanos(self.total_up_time),
            total_down_time: duration_to_nanos(self.total_down_time),
            last_uptime_downtime: to_unix_nanos(self.last_uptime_downtime),
            genesis_time: to_unix_nanos(self.genesis_time),
        }
    }

    /// Rebuild a record from its persisted form, without any accounting catch-up
    pub fn from_dto(public_key: Bytes, dto: HeartbeatDto) -> Self {
        Self {
            public_key,
            is_active: dto.is_active,
            peer_type: dto.peer_type,
            computed_shard_id: dto.computed_shard_id,
            received_shard_id: dto.received_shard_id,
            version_number: dto.version_number,
            node_display_name: dto.node_display_name,
            time_stamp: from_unix_nanos(dto.time_stamp),
            max_inactive_time: nanos_to_duration(dto.max_inactive_time),
            total_up_time: nanos_to_duration(dto.total_up_time),
            total_down_time: nanos_to_duration(dto.total_down_time),
            last_uptime_downtime: from_unix_nanos(dto.last_uptime_downtime),
            genesis_time: from_unix_nanos(dto.genesis_time),
        }
    }

    /// Exported snapshot view
    pub fn to_peer_heartbeat(&self) -> PeerHeartbeat {
        PeerHeartbeat {
            hex_public_key: hex::encode(&self.public_key),
            time_stamp: self.time_stamp,
            max_inactive_time: self.max_inactive_time,
            is_active: self.is_active,
            received_shard_id: self.received_shard_id,
            computed_shard_id: self.computed_shard_id,
            total_up_time: whole_seconds(self.total_up_time),
            total_down_time: whole_seconds(self.total_down_time),
            version_number: self.version_number.clone(),
            node_display_name: self.node_display_name.clone(),
            peer_type: self.peer_type,
        }
    }
}

/// `to - from`, clipped at zero
fn elapsed(from: SystemTime, to: SystemTime) -> Duration {
    to.duration_since(from).unwrap_or_default()
}
