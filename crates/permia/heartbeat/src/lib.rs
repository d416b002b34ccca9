//! Permia Heartbeat Monitor
//!
//! Tracks which validators and observers of the Permia network are alive,
//! based on the heartbeat messages every node gossips periodically, and keeps
//! cumulative uptime and downtime per public key across restarts.
//!
//! # Architecture
//!
//! ```text
//!  gossip layer                       HeartbeatMonitor
//!       │                                   │
//!       │  P2pMessage (topic "heartbeat")   │
//!       │──────────────────────────────────►│ 1. antiflood checks
//!       │                                   │ 2. decode Heartbeat
//!       │◄──────────────── Ok / Err ────────│
//!       │                                   │
//!       │                           (background task)
//!       │                                   │ 3. update PeerRecord
//!       │                                   │ 4. persist record + known peers
//!       │                                   │ 5. evaluate_all ──► metrics
//!       │                                   │
//!  API / CLI ──── heartbeat_snapshot ──────►│ evaluate, sort by hex key
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use permia_heartbeat::{
//!     HeartbeatConfig, HeartbeatMonitor, JsonHeartbeatDecoder, KvHeartbeatStorage,
//!     MemoryKeyValueStore, StaticPeerTypeProvider, SystemClock, DisabledAntiflood,
//! };
//!
//! let monitor = HeartbeatMonitor::builder(HeartbeatConfig::default())
//!     .initial_nodes(nodes)
//!     .storage(KvHeartbeatStorage::new(MemoryKeyValueStore::new()))
//!     .decoder(JsonHeartbeatDecoder::default())
//!     .peer_type_provider(StaticPeerTypeProvider::new(eligible, waiting))
//!     .antiflood(DisabledAntiflood::default())
//!     .clock(SystemClock::default())
//!     .build()?;
//!
//! tokio::spawn(monitor.evaluation_task());
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod antiflood;
mod clock;
mod config;
mod dto;
mod error;
mod message;
mod metrics;
mod monitor;
mod peer_type;
mod record;
mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use antiflood::{AntifloodHandler, DisabledAntiflood};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    HeartbeatConfig, DEFAULT_EVALUATION_INTERVAL, DEFAULT_MAX_DURATION_PEER_UNRESPONSIVE,
    HEARTBEAT_TOPIC,
};
pub use dto::{HeartbeatDto, PeerHeartbeat};
pub use error::{BoxError, HeartbeatError, StorageError};
pub use message::{
    DecodeError, GossipMessage, Heartbeat, HeartbeatDecoder, HeartbeatLimits,
    JsonHeartbeatDecoder, P2pMessage, PeerId,
};
pub use metrics::{
    LivenessCounters, MetricsRecorderSink, MetricsSink, NoopMetricsSink, CONNECTED_NODES,
    LIVE_VALIDATOR_NODES,
};
pub use monitor::{HeartbeatMonitor, HeartbeatMonitorBuilder};
pub use peer_type::{PeerType, PeerTypeError, PeerTypeProvider, StaticPeerTypeProvider};
pub use record::PeerRecord;
pub use storage::{HeartbeatStorage, KeyValueStore, KvHeartbeatStorage, MemoryKeyValueStore};
