//! Heartbeat persistence.
//!
//! [`HeartbeatStorage`] is what the monitor talks to. [`KvHeartbeatStorage`]
//! implements it on top of any [`KeyValueStore`], encoding entries as JSON.

use crate::{
    dto::{from_unix_nanos, to_unix_nanos},
    error::StorageError,
    HeartbeatDto,
};
use alloy_primitives::Bytes;
use auto_impl::auto_impl;
use parking_lot::RwLock;
use std::{collections::HashMap, fmt::Debug, time::SystemTime};
use tracing::debug;

const RECORD_PREFIX: &[u8] = b"heartbeat/";
const KNOWN_PEERS_KEY: &[u8] = b"heartbeat_known_peers";
const GENESIS_TIME_KEY: &[u8] = b"heartbeat_genesis_time";

/// Durable store for peer records and the known peers list
#[auto_impl(&, Arc, Box)]
pub trait HeartbeatStorage: Send + Sync + Debug {
    /// Load the record of `pub_key`, `Ok(None)` if it was never stored
    fn load_record(&self, pub_key: &[u8]) -> Result<Option<HeartbeatDto>, StorageError>;

    /// Store the record of `pub_key`
    fn save_record(&self, pub_key: &[u8], record: &HeartbeatDto) -> Result<(), StorageError>;

    /// Load every public key ever observed, in observation order
    fn load_known_peers(&self) -> Result<Vec<Bytes>, StorageError>;

    /// Replace the stored known peers list
    fn save_known_peers(&self, peers: &[Bytes]) -> Result<(), StorageError>;

    /// Record the network genesis time
    fn update_genesis_time(&self, genesis_time: SystemTime) -> Result<(), StorageError>;
}

/// Minimal byte oriented key-value backend
#[auto_impl(&, Arc, Box)]
pub trait KeyValueStore: Send + Sync + Debug {
    /// Read a value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or overwrite a value
    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;
}

/// In-memory [`KeyValueStore`]
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKeyValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }
}

/// [`HeartbeatStorage`] over a [`KeyValueStore`]
#[derive(Debug, Default)]
pub struct KvHeartbeatStorage<S> {
    store: S,
}

impl<S: KeyValueStore> KvHeartbeatStorage<S> {
    /// Wrap a key-value backend
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying backend
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn record_key(pub_key: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(RECORD_PREFIX.len() + pub_key.len());
        key.extend_from_slice(RECORD_PREFIX);
        key.extend_from_slice(pub_key);
        key
    }

    fn load_genesis_time(&self) -> Result<Option<SystemTime>, StorageError> {
        let Some(raw) = self.store.get(GENESIS_TIME_KEY)? else { return Ok(None) };
        let nanos: i64 = serde_json::from_slice(&raw)?;
        Ok(Some(from_unix_nanos(nanos)))
    }
}

impl<S: KeyValueStore> HeartbeatStorage for KvHeartbeatStorage<S> {
    fn load_record(&self, pub_key: &[u8]) -> Result<Option<HeartbeatDto>, StorageError> {
        self.store
            .get(&Self::record_key(pub_key))?
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(Into::into)
    }

    fn save_record(&self, pub_key: &[u8], record: &HeartbeatDto) -> Result<(), StorageError> {
        self.store.put(&Self::record_key(pub_key), serde_json::to_vec(record)?)
    }

    fn load_known_peers(&self) -> Result<Vec<Bytes>, StorageError> {
        match self.store.get(KNOWN_PEERS_KEY)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_known_peers(&self, peers: &[Bytes]) -> Result<(), StorageError> {
        self.store.put(KNOWN_PEERS_KEY, serde_json::to_vec(peers)?)
    }

    fn update_genesis_time(&self, genesis_time: SystemTime) -> Result<(), StorageError> {
        if let Some(stored) = self.load_genesis_time()? {
            if stored != genesis_time {
                debug!(
                    target: "permia::heartbeat",
                    stored = to_unix_nanos(stored),
                    configured = to_unix_nanos(genesis_time),
                    "Genesis time changed, updating stored value"
                );
            }
        }
        self.store.put(GENESIS_TIME_KEY, serde_json::to_vec(&to_unix_nanos(genesis_time))?)
    }
}
