//! Collaborator doubles for exercising the monitor.

use crate::{
    antiflood::AntifloodHandler, error::BoxError, metrics::MetricsSink, storage::HeartbeatStorage,
    GossipMessage, Heartbeat, HeartbeatDto, KvHeartbeatStorage, MemoryKeyValueStore, P2pMessage,
    PeerId, StorageError, HEARTBEAT_TOPIC,
};
use alloy_primitives::Bytes;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashMap,
    sync::{mpsc, Arc},
    time::SystemTime,
};

/// Metrics sink remembering the last value of every counter
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    values: Mutex<HashMap<&'static str, u64>>,
}

impl RecordingMetrics {
    /// Last value published for `name`
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.lock().get(name).copied()
    }
}

impl MetricsSink for RecordingMetrics {
    fn set_counter(&self, name: &'static str, value: u64) {
        self.values.lock().insert(name, value);
    }
}

/// Storage whose writes always fail. Reads find nothing.
#[derive(Debug, Default)]
pub struct FailingStorage {
    fail_genesis: bool,
}

impl FailingStorage {
    /// `fail_genesis` also fails the genesis update done at construction
    pub const fn new(fail_genesis: bool) -> Self {
        Self { fail_genesis }
    }

    fn error() -> StorageError {
        StorageError::Backend("storage unavailable".to_owned())
    }
}

impl HeartbeatStorage for FailingStorage {
    fn load_record(&self, _pub_key: &[u8]) -> Result<Option<HeartbeatDto>, StorageError> {
        Ok(None)
    }

    fn save_record(&self, _pub_key: &[u8], _record: &HeartbeatDto) -> Result<(), StorageError> {
        Err(Self::error())
    }

    fn load_known_peers(&self) -> Result<Vec<Bytes>, StorageError> {
        Ok(Vec::new())
    }

    fn save_known_peers(&self, _peers: &[Bytes]) -> Result<(), StorageError> {
        Err(Self::error())
    }

    fn update_genesis_time(&self, _genesis_time: SystemTime) -> Result<(), StorageError> {
        if self.fail_genesis { Err(Self::error()) } else { Ok(()) }
    }
}

/// Storage delegating to another one, with scripted read failures
#[derive(Debug)]
pub struct FlakyStorage {
    inner: Arc<dyn HeartbeatStorage>,
    failing_records: Vec<Bytes>,
    fail_known_peers: bool,
}

impl FlakyStorage {
    /// Wrap `inner`, failing nothing yet
    pub fn new(inner: impl HeartbeatStorage + 'static) -> Self {
        Self { inner: Arc::new(inner), failing_records: Vec::new(), fail_known_peers: false }
    }

    /// Fail every load of the record of `pub_key`
    pub fn fail_record_load(mut self, pub_key: impl Into<Bytes>) -> Self {
        self.failing_records.push(pub_key.into());
        self
    }

    /// Fail every load of the known peers list
    pub const fn fail_known_peers_load(mut self) -> Self {
        self.fail_known_peers = true;
        self
    }
}

impl HeartbeatStorage for FlakyStorage {
    fn load_record(&self, pub_key: &[u8]) -> Result<Option<HeartbeatDto>, StorageError> {
        if self.failing_records.iter().any(|key| key.as_ref() == pub_key) {
            return Err(StorageError::Backend("record read failed".to_owned()));
        }
        self.inner.load_record(pub_key)
    }

    fn save_record(&self, pub_key: &[u8], record: &HeartbeatDto) -> Result<(), StorageError> {
        self.inner.save_record(pub_key, record)
    }

    fn load_known_peers(&self) -> Result<Vec<Bytes>, StorageError> {
        if self.fail_known_peers {
            return Err(StorageError::Backend("known peers read failed".to_owned()));
        }
        self.inner.load_known_peers()
    }

    fn save_known_peers(&self, peers: &[Bytes]) -> Result<(), StorageError> {
        self.inner.save_known_peers(peers)
    }

    fn update_genesis_time(&self, genesis_time: SystemTime) -> Result<(), StorageError> {
        self.inner.update_genesis_time(genesis_time)
    }
}

/// In-memory storage whose record writes for one key block until [`GatedStorage::release`]
#[derive(Debug)]
pub struct GatedStorage {
    inner: KvHeartbeatStorage<MemoryKeyValueStore>,
    gated_key: Bytes,
    entered: Mutex<mpsc::Sender<()>>,
    released: Mutex<bool>,
    release: Condvar,
}

impl GatedStorage {
    /// Gate writes of `gated_key`. The receiver is notified whenever a write reaches the gate.
    pub fn new(gated_key: impl Into<Bytes>) -> (Self, mpsc::Receiver<()>) {
        let (entered, notifications) = mpsc::channel();
        let storage = Self {
            inner: KvHeartbeatStorage::new(MemoryKeyValueStore::new()),
            gated_key: gated_key.into(),
            entered: Mutex::new(entered),
            released: Mutex::new(false),
            release: Condvar::new(),
        };
        (storage, notifications)
    }

    /// Let every pending and future write through
    pub fn release(&self) {
        *self.released.lock() = true;
        self.release.notify_all();
    }
}

impl HeartbeatStorage for GatedStorage {
    fn load_record(&self, pub_key: &[u8]) -> Result<Option<HeartbeatDto>, StorageError> {
        self.inner.load_record(pub_key)
    }

    fn save_record(&self, pub_key: &[u8], record: &HeartbeatDto) -> Result<(), StorageError> {
        if pub_key == self.gated_key.as_ref() {
            self.entered.lock().send(()).ok();
            let mut released = self.released.lock();
            while !*released {
                self.release.wait(&mut released);
            }
        }
        self.inner.save_record(pub_key, record)
    }

    fn load_known_peers(&self) -> Result<Vec<Bytes>, StorageError> {
        self.inner.load_known_peers()
    }

    fn save_known_peers(&self, peers: &[Bytes]) -> Result<(), StorageError> {
        self.inner.save_known_peers(peers)
    }

    fn update_genesis_time(&self, genesis_time: SystemTime) -> Result<(), StorageError> {
        self.inner.update_genesis_time(genesis_time)
    }
}

/// Antiflood handler rejecting every message, or every message on one topic
#[derive(Debug, Default)]
pub struct ScriptedAntiflood {
    reject_messages: bool,
    reject_topic: Option<String>,
}

impl ScriptedAntiflood {
    /// Reject at the per-message check
    pub fn reject_messages() -> Self {
        Self { reject_messages: true, reject_topic: None }
    }

    /// Reject at the per-topic check for `topic`
    pub fn reject_topic(topic: impl Into<String>) -> Self {
        Self { reject_messages: false, reject_topic: Some(topic.into()) }
    }
}

impl AntifloodHandler for ScriptedAntiflood {
    fn can_process_message(&self, _message: &dyn P2pMessage, _from: &PeerId) -> Result<(), BoxError> {
        if self.reject_messages {
            return Err("message rejected".into());
        }
        Ok(())
    }

    fn can_process_message_on_topic(&self, _from: &PeerId, topic: &str) -> Result<(), BoxError> {
        match &self.reject_topic {
            Some(rejected) if rejected == topic => Err(format!("topic {topic} rejected").into()),
            _ => Ok(()),
        }
    }
}

/// JSON encoded heartbeat gossip message from `pubkey`
pub fn heartbeat_message(pubkey: &str, shard_id: u32) -> GossipMessage {
    let heartbeat = Heartbeat {
        payload: Bytes::new(),
        pubkey: Bytes::copy_from_slice(pubkey.as_bytes()),
        shard_id,
        version_number: "v1.0.0".to_owned(),
        node_display_name: pubkey.to_owned(),
    };
    let data = serde_json::to_vec(&heartbeat).unwrap_or_default();
    GossipMessage::new(data, HEARTBEAT_TOPIC, PeerId::ZERO)
}
