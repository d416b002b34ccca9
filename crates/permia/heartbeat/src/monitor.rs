//! Heartbeat monitor
//!
//! Owns one [`PeerRecord`] per public key and keeps them up to date from
//! gossiped heartbeats.
//!
//! ```text
//! gossip ──► antiflood ──► decoder ──► process_received_message ──► (task) add_heartbeat
//!                                                                         │
//!                                        state lock ◄── find-or-create ◄─┘ (map lock)
//!                                             │
//!                                        persist lock ──► storage (record, known peers)
//!
//! evaluate_all ──► evaluate(now) on every record ──► metrics
//!                          └──► (task) persist records that went inactive
//! ```
//!
//! The record map and each record have independent locks: the map lock is
//! only held to find, insert or iterate, so heartbeats from unrelated peers
//! never wait on each other. Storage writes take a record's persist lock and
//! only touch its state lock to copy it, so no I/O happens under the map lock
//! or a state lock. Storage and peer type resolution run on the blocking pool
//! and their failures are logged, never returned.

use crate::{
    antiflood::AntifloodHandler,
    clock::Clock,
    config::HeartbeatConfig,
    error::{HeartbeatError, StorageError},
    message::{Heartbeat, HeartbeatDecoder, P2pMessage},
    metrics::{LivenessCounters, MetricsSink, NoopMetricsSink},
    peer_type::{PeerType, PeerTypeProvider},
    storage::HeartbeatStorage,
    PeerHeartbeat, PeerId, PeerRecord,
};
use alloy_primitives::{hex, Bytes};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{runtime::Handle, time::MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

type SharedRecord = Arc<TrackedRecord>;

/// A record with its own state lock and a second lock ordering its writes to storage.
///
/// Storage I/O only ever holds `persist`, never `state`, so evaluation passes and
/// snapshots are not held up by a slow write.
#[derive(Debug)]
struct TrackedRecord {
    state: Mutex<PeerRecord>,
    persist: Mutex<()>,
}

impl TrackedRecord {
    fn new(record: PeerRecord) -> SharedRecord {
        Arc::new(Self { state: Mutex::new(record), persist: Mutex::new(()) })
    }

    /// Write the current state. Snapshots taken under `persist` reach storage in order.
    fn persist(&self, storage: &dyn HeartbeatStorage, pub_key: &[u8]) {
        let _persist = self.persist.lock();
        let dto = self.state.lock().to_dto();
        if let Err(err) = storage.save_record(pub_key, &dto) {
            debug!(
                target: "permia::heartbeat",
                public_key = %hex::encode(pub_key),
                %err,
                "Cannot save heartbeat record"
            );
        }
    }
}

/// Liveness monitor fed by heartbeat messages.
///
/// Cheap to clone, all clones share the same state.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Debug)]
struct MonitorInner {
    config: HeartbeatConfig,
    records: RwLock<HashMap<Bytes, SharedRecord>>,
    shard_members: BTreeMap<u32, Vec<Bytes>>,
    known_peers: Mutex<Vec<Bytes>>,
    storage: Arc<dyn HeartbeatStorage>,
    decoder: Arc<dyn HeartbeatDecoder>,
    peer_types: Arc<dyn PeerTypeProvider>,
    antiflood: Arc<dyn AntifloodHandler>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    tasks: TaskTracker,
    runtime: Handle,
}

impl HeartbeatMonitor {
    /// Start building a monitor
    pub fn builder(config: HeartbeatConfig) -> HeartbeatMonitorBuilder {
        HeartbeatMonitorBuilder::new(config)
    }

    /// Entry point for the gossip layer.
    ///
    /// Runs the antiflood checks and decodes the heartbeat, then schedules the
    /// state update in the background and returns.
    pub fn process_received_message(
        &self,
        message: &dyn P2pMessage,
        from: &PeerId,
    ) -> Result<(), HeartbeatError> {
        if message.data().is_none_or(|data| data.is_empty()) {
            return Err(HeartbeatError::NilDataToProcess);
        }

        let inner = &self.inner;
        inner.antiflood.can_process_message(message, from).map_err(HeartbeatError::Admission)?;
        inner
            .antiflood
            .can_process_message_on_topic(from, &inner.config.topic)
            .map_err(HeartbeatError::Admission)?;

        let heartbeat = inner.decoder.create_heartbeat(message).map_err(HeartbeatError::Decode)?;

        trace!(
            target: "permia::heartbeat",
            public_key = %hex::encode(&heartbeat.pubkey),
            %from,
            "Heartbeat accepted"
        );

        let task = Arc::clone(inner);
        inner.tasks.spawn_blocking_on(
            move || {
                task.add_heartbeat(heartbeat);
                task.evaluate_all();
            },
            &inner.runtime,
        );

        Ok(())
    }

    /// Apply a decoded heartbeat synchronously
    pub fn add_heartbeat(&self, heartbeat: Heartbeat) {
        self.inner.add_heartbeat(heartbeat);
    }

    /// Evaluate every record at the current time and publish the counters
    pub fn evaluate_all(&self) -> LivenessCounters {
        self.inner.evaluate_all()
    }

    /// Accounting-fresh view of every peer, sorted by hex public key
    pub fn heartbeat_snapshot(&self) -> Vec<PeerHeartbeat> {
        self.inner.evaluate_all();

        let mut status: Vec<_> = self
            .inner
            .records
            .read()
            .values()
            .map(|record| record.state.lock().to_peer_heartbeat())
            .collect();
        status.sort_by(|a, b| a.hex_public_key.cmp(&b.hex_public_key));
        status
    }

    /// Copy of the record held for `pub_key`
    pub fn peer_record(&self, pub_key: &Bytes) -> Option<PeerRecord> {
        let record = self.inner.records.read().get(pub_key).cloned()?;
        let record = record.state.lock().clone();
        Some(record)
    }

    /// Number of tracked peers
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Whether no peer is tracked
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Shard membership supplied at construction
    pub fn shard_members(&self) -> &BTreeMap<u32, Vec<Bytes>> {
        &self.inner.shard_members
    }

    /// Every public key a heartbeat was ever received from, in first-seen order
    pub fn known_peers(&self) -> Vec<Bytes> {
        self.inner.known_peers.lock().clone()
    }

    /// Active configuration
    pub fn config(&self) -> &HeartbeatConfig {
        &self.inner.config
    }

    /// Future running [`Self::evaluate_all`] every `evaluation_interval`.
    ///
    /// Never completes; spawn it next to the gossip service.
    pub fn evaluation_task(&self) -> impl Future<Output = ()> + Send + 'static {
        let monitor = self.clone();
        let period = self.inner.config.evaluation_interval.max(Duration::from_millis(1));
        async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let counters = monitor.evaluate_all();
                trace!(
                    target: "permia::heartbeat",
                    connected = counters.connected_nodes,
                    validators = counters.live_validators,
                    "Evaluated peer liveness"
                );
            }
        }
    }

    /// Wait for every background update and persistence task spawned so far
    pub async fn flush(&self) {
        let tasks = &self.inner.tasks;
        tasks.close();
        tasks.wait().await;
        tasks.reopen();
    }
}

impl MonitorInner {
    fn add_heartbeat(&self, heartbeat: Heartbeat) {
        let Heartbeat { pubkey, shard_id, version_number, node_display_name, .. } = heartbeat;
        let (peer_type, computed_shard_id) = self.compute_peer_type_and_shard(&pubkey);
        let now = self.clock.now();

        let record = self.find_or_create(&pubkey, peer_type, computed_shard_id, now);
        record.state.lock().heartbeat_received(
            now,
            computed_shard_id,
            shard_id,
            version_number,
            node_display_name,
            peer_type,
        );
        record.persist(self.storage.as_ref(), &pubkey);
        self.register_known_peer(pubkey);
    }

    fn find_or_create(
        &self,
        pub_key: &Bytes,
        peer_type: PeerType,
        computed_shard_id: u32,
        now: SystemTime,
    ) -> SharedRecord {
        if let Some(record) = self.records.read().get(pub_key) {
            return Arc::clone(record);
        }

        let mut records = self.records.write();
        let record = records.entry(pub_key.clone()).or_insert_with(|| {
            debug!(
                target: "permia::heartbeat",
                public_key = %hex::encode(pub_key),
                %peer_type,
                "Tracking new peer"
            );
            TrackedRecord::new(PeerRecord::new(
                pub_key.clone(),
                self.config.max_duration_peer_unresponsive,
                peer_type,
                computed_shard_id,
                self.config.genesis_time,
                now,
            ))
        });
        Arc::clone(record)
    }

    fn register_known_peer(&self, pub_key: Bytes) {
        let mut peers = self.known_peers.lock();
        if peers.contains(&pub_key) {
            return;
        }
        peers.push(pub_key);
        if let Err(err) = self.storage.save_known_peers(&peers) {
            debug!(target: "permia::heartbeat", %err, "Cannot save known peers");
        }
    }

    fn evaluate_all(&self) -> LivenessCounters {
        let now = self.clock.now();
        let mut counters = LivenessCounters::default();
        let mut went_inactive = Vec::new();

        for (key, record) in self.records.read().iter() {
            let mut guard = record.state.lock();
            if guard.evaluate(now) {
                went_inactive.push((key.clone(), Arc::clone(record)));
            }
            if guard.is_active() {
                counters.connected_nodes += 1;
                if guard.is_validator() {
                    counters.live_validators += 1;
                }
            }
        }

        self.spawn_save(went_inactive);
        counters.publish(self.metrics.as_ref());
        counters
    }

    fn spawn_save(&self, records: Vec<(Bytes, SharedRecord)>) {
        if records.is_empty() {
            return;
        }
        let storage = Arc::clone(&self.storage);
        self.tasks.spawn_blocking_on(move || save_records(storage.as_ref(), &records), &self.runtime);
    }

    fn compute_peer_type_and_shard(&self, pub_key: &[u8]) -> (PeerType, u32) {
        self.peer_types.compute_for_pub_key(pub_key).unwrap_or_else(|err| {
            warn!(
                target: "permia::heartbeat",
                public_key = %hex::encode(pub_key),
                %err,
                "Cannot compute peer type and shard, defaulting to observer"
            );
            (PeerType::Observer, 0)
        })
    }

    fn compute_peer_type(&self, pub_key: &[u8], shard_id: u32) -> PeerType {
        self.peer_types.compute_for_pub_key_in_shard(pub_key, shard_id).unwrap_or_else(|err| {
            warn!(
                target: "permia::heartbeat",
                public_key = %hex::encode(pub_key),
                shard_id,
                %err,
                "Cannot compute peer type, defaulting to observer"
            );
            PeerType::Observer
        })
    }

    /// Load a persisted record and catch its accounting up to `now`.
    ///
    /// `Ok(None)` means the key was never stored.
    fn load_record(
        &self,
        pub_key: &Bytes,
        now: SystemTime,
    ) -> Result<Option<PeerRecord>, StorageError> {
        let Some(dto) = self.storage.load_record(pub_key)? else { return Ok(None) };

        let mut record = PeerRecord::from_dto(pub_key.clone(), dto);
        record.set_max_inactive_time(self.config.max_duration_peer_unresponsive);
        record.resume(now);
        record.set_genesis_time(self.config.genesis_time);
        record.set_peer_type(self.compute_peer_type(pub_key, record.computed_shard_id()));
        Ok(Some(record))
    }

    fn fresh_record(&self, pub_key: &Bytes, now: SystemTime) -> SharedRecord {
        let (peer_type, shard_id) = self.compute_peer_type_and_shard(pub_key);
        TrackedRecord::new(PeerRecord::new(
            pub_key.clone(),
            self.config.max_duration_peer_unresponsive,
            peer_type,
            shard_id,
            self.config.genesis_time,
            now,
        ))
    }

    /// Create or reload a record for every key of the initial assignment.
    ///
    /// Returns the records that were not found in storage. Keys whose load failed
    /// are tracked from a fresh record but not returned, so the stored history is
    /// left for a later run to pick up.
    fn initialize_records(
        &self,
        initial_nodes: &BTreeMap<u32, Vec<Bytes>>,
    ) -> Vec<(Bytes, SharedRecord)> {
        let now = self.clock.now();
        let mut loaded = HashMap::new();
        let mut to_save = Vec::new();

        for key in initial_nodes.values().flatten() {
            let record = match self.load_record(key, now) {
                Ok(Some(record)) => TrackedRecord::new(record),
                Ok(None) => {
                    let record = self.fresh_record(key, now);
                    to_save.push((key.clone(), Arc::clone(&record)));
                    record
                }
                Err(err) => {
                    warn!(
                        target: "permia::heartbeat",
                        public_key = %hex::encode(key),
                        %err,
                        "Cannot load heartbeat record, tracking a fresh one"
                    );
                    self.fresh_record(key, now)
                }
            };
            loaded.insert(key.clone(), record);
        }

        self.records.write().extend(loaded);
        to_save
    }

    /// Reload peers seen in earlier runs that are not part of the current assignment
    fn load_known_peers(&self) {
        let peers = match self.storage.load_known_peers() {
            Ok(peers) => peers,
            Err(err) => {
                debug!(target: "permia::heartbeat", %err, "Cannot load known peers from storage");
                return;
            }
        };

        let now = self.clock.now();
        let missing: Vec<_> = {
            let records = self.records.read();
            peers.iter().filter(|peer| !records.contains_key(*peer)).cloned().collect()
        };

        let mut loaded = Vec::with_capacity(missing.len());
        for peer in missing {
            match self.load_record(&peer, now) {
                Ok(Some(record)) => loaded.push((peer, TrackedRecord::new(record))),
                Ok(None) => trace!(
                    target: "permia::heartbeat",
                    public_key = %hex::encode(&peer),
                    "Skipping known peer without stored record"
                ),
                Err(err) => debug!(
                    target: "permia::heartbeat",
                    public_key = %hex::encode(&peer),
                    %err,
                    "Cannot load known peer record, skipping"
                ),
            }
        }
        self.records.write().extend(loaded);

        let mut known = self.known_peers.lock();
        for peer in peers {
            if !known.contains(&peer) {
                known.push(peer);
            }
        }
    }
}

fn save_records(storage: &dyn HeartbeatStorage, records: &[(Bytes, SharedRecord)]) {
    for (key, record) in records {
        record.persist(storage, key);
    }
}

/// Builder for [`HeartbeatMonitor`].
///
/// Every collaborator except the metrics sink is required.
#[derive(Debug, Default)]
pub struct HeartbeatMonitorBuilder {
    config: HeartbeatConfig,
    initial_nodes: BTreeMap<u32, Vec<Bytes>>,
    storage: Option<Arc<dyn HeartbeatStorage>>,
    decoder: Option<Arc<dyn HeartbeatDecoder>>,
    peer_types: Option<Arc<dyn PeerTypeProvider>>,
    antiflood: Option<Arc<dyn AntifloodHandler>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    runtime: Option<Handle>,
}

impl HeartbeatMonitorBuilder {
    /// Create a builder with the given configuration
    pub fn new(config: HeartbeatConfig) -> Self {
        Self { config, ..Default::default() }
    }

    /// Public keys per shard to track from the start
    pub fn initial_nodes(mut self, initial_nodes: BTreeMap<u32, Vec<Bytes>>) -> Self {
        self.initial_nodes = initial_nodes;
        self
    }

    /// Persistence adapter
    pub fn storage(mut self, storage: impl HeartbeatStorage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Heartbeat decoder
    pub fn decoder(mut self, decoder: impl HeartbeatDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Peer role resolver
    pub fn peer_type_provider(mut self, provider: impl PeerTypeProvider + 'static) -> Self {
        self.peer_types = Some(Arc::new(provider));
        self
    }

    /// Antiflood handler
    pub fn antiflood(mut self, antiflood: impl AntifloodHandler + 'static) -> Self {
        self.antiflood = Some(Arc::new(antiflood));
        self
    }

    /// Clock source
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Metrics sink, defaults to [`NoopMetricsSink`]
    pub fn metrics(mut self, metrics: impl MetricsSink + 'static) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    /// Runtime for background tasks, defaults to the ambient one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the collaborators, restore state from storage and create the monitor
    pub fn build(self) -> Result<HeartbeatMonitor, HeartbeatError> {
        let storage = self.storage.ok_or(HeartbeatError::MissingCollaborator("storage"))?;
        let decoder = self.decoder.ok_or(HeartbeatError::MissingCollaborator("decoder"))?;
        let peer_types =
            self.peer_types.ok_or(HeartbeatError::MissingCollaborator("peer type provider"))?;
        let antiflood = self.antiflood.ok_or(HeartbeatError::MissingCollaborator("antiflood"))?;
        let clock = self.clock.ok_or(HeartbeatError::MissingCollaborator("clock"))?;
        if self.initial_nodes.is_empty() {
            return Err(HeartbeatError::EmptyPublicKeysMap);
        }
        if self.config.max_duration_peer_unresponsive.is_zero() {
            return Err(HeartbeatError::InvalidUnresponsiveDuration);
        }
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        storage.update_genesis_time(self.config.genesis_time)?;

        let inner = Arc::new(MonitorInner {
            config: self.config,
            records: RwLock::new(HashMap::new()),
            shard_members: self.initial_nodes.clone(),
            known_peers: Mutex::new(Vec::new()),
            storage,
            decoder,
            peer_types,
            antiflood,
            clock,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink)),
            tasks: TaskTracker::new(),
            runtime,
        });

        let to_save = inner.initialize_records(&self.initial_nodes);
        inner.spawn_save(to_save);
        inner.load_known_peers();

        debug!(
            target: "permia::heartbeat",
            peers = inner.records.read().len(),
            known = inner.known_peers.lock().len(),
            "Heartbeat monitor initialized"
        );

        Ok(HeartbeatMonitor { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{
            heartbeat_message, FailingStorage, FlakyStorage, GatedStorage, RecordingMetrics,
            ScriptedAntiflood,
        },
        DisabledAntiflood, JsonHeartbeatDecoder, KvHeartbeatStorage, ManualClock,
        MemoryKeyValueStore, StaticPeerTypeProvider, CONNECTED_NODES, LIVE_VALIDATOR_NODES,
    };
    use assert_matches::assert_matches;
    use std::{sync::mpsc, thread, time::UNIX_EPOCH};

    const THRESHOLD: Duration = Duration::from_secs(60);

    type Storage = Arc<KvHeartbeatStorage<MemoryKeyValueStore>>;

    fn key(name: &'static str) -> Bytes {
        Bytes::from_static(name.as_bytes())
    }

    fn heartbeat(name: &'static str, shard_id: u32) -> Heartbeat {
        Heartbeat {
            payload: Bytes::new(),
            pubkey: key(name),
            shard_id,
            version_number: "v1".into(),
            node_display_name: name.into(),
        }
    }

    fn start() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn peer_types() -> StaticPeerTypeProvider {
        let eligible = BTreeMap::from([(0, vec![key("A")]), (1, vec![key("B")])]);
        StaticPeerTypeProvider::new(eligible, BTreeMap::new())
    }

    fn builder(storage: Storage, clock: Arc<ManualClock>) -> HeartbeatMonitorBuilder {
        let config = HeartbeatConfig::default()
            .with_max_duration_peer_unresponsive(THRESHOLD)
            .with_genesis_time(start());
        HeartbeatMonitor::builder(config)
            .initial_nodes(BTreeMap::from([(0, vec![key("A")])]))
            .storage(storage)
            .decoder(JsonHeartbeatDecoder::default())
            .peer_type_provider(peer_types())
            .antiflood(DisabledAntiflood)
            .clock(clock)
    }

    fn setup() -> (HeartbeatMonitor, Storage, Arc<ManualClock>) {
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let clock = Arc::new(ManualClock::new(start()));
        let monitor = builder(storage.clone(), clock.clone()).build().unwrap();
        (monitor, storage, clock)
    }

    #[tokio::test]
    async fn rejects_invalid_construction() {
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let clock = Arc::new(ManualClock::new(start()));

        let err = HeartbeatMonitor::builder(HeartbeatConfig::default())
            .initial_nodes(BTreeMap::from([(0, vec![key("A")])]))
            .storage(storage.clone())
            .build()
            .unwrap_err();
        assert_matches!(err, HeartbeatError::MissingCollaborator("decoder"));

        let err = builder(storage.clone(), clock.clone())
            .initial_nodes(BTreeMap::new())
            .build()
            .unwrap_err();
        assert_matches!(err, HeartbeatError::EmptyPublicKeysMap);

        let zero = HeartbeatConfig::default().with_max_duration_peer_unresponsive(Duration::ZERO);
        let err = HeartbeatMonitorBuilder { config: zero, ..builder(storage, clock) }
            .build()
            .unwrap_err();
        assert_matches!(err, HeartbeatError::InvalidUnresponsiveDuration);
    }

    #[tokio::test]
    async fn genesis_storage_failure_aborts_construction() {
        let clock = Arc::new(ManualClock::new(start()));
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let err = builder(storage, clock)
            .storage(FailingStorage::new(true))
            .build()
            .unwrap_err();
        assert_matches!(err, HeartbeatError::Storage(_));
    }

    #[tokio::test]
    async fn initial_peer_starts_inactive_and_turns_active_on_heartbeat() {
        let (monitor, storage, clock) = setup();

        let snapshot = monitor.heartbeat_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].hex_public_key, hex::encode("A"));
        assert!(!snapshot[0].is_active);

        monitor.process_received_message(&heartbeat_message("A", 0), &PeerId::ZERO).unwrap();
        monitor.flush().await;

        monitor.evaluate_all();
        let record = monitor.peer_record(&key("A")).unwrap();
        assert!(record.is_active());
        assert_eq!(record.time_stamp(), clock.now());
        assert_eq!(record.peer_type(), PeerType::Eligible);
        assert!(storage.load_record(b"A").unwrap().unwrap().is_active);
        assert_eq!(monitor.known_peers(), vec![key("A")]);
    }

    #[tokio::test]
    async fn silent_peer_reverts_to_inactive() {
        let (monitor, storage, clock) = setup();
        monitor.process_received_message(&heartbeat_message("A", 0), &PeerId::ZERO).unwrap();
        monitor.flush().await;
        monitor.evaluate_all();
        let before = monitor.peer_record(&key("A")).unwrap();

        clock.advance(THRESHOLD + Duration::from_nanos(1));
        monitor.evaluate_all();
        let after = monitor.peer_record(&key("A")).unwrap();

        assert!(!after.is_active());
        let up = after.total_up_time() - before.total_up_time();
        let down = after.total_down_time() - before.total_down_time();
        assert!(up >= THRESHOLD);
        assert!(down <= Duration::from_nanos(1));
        assert_eq!(up + down, THRESHOLD + Duration::from_nanos(1));

        // the transition is persisted in the background
        monitor.flush().await;
        assert!(!storage.load_record(b"A").unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn unseen_peer_is_tracked_once() {
        let (monitor, _storage, _clock) = setup();
        let message = heartbeat_message("B", 7);

        monitor.process_received_message(&message, &PeerId::ZERO).unwrap();
        monitor.process_received_message(&message, &PeerId::ZERO).unwrap();
        monitor.flush().await;

        assert_eq!(monitor.len(), 2);
        assert_eq!(monitor.known_peers(), vec![key("B")]);

        let record = monitor.peer_record(&key("B")).unwrap();
        assert_eq!(record.peer_type(), PeerType::Eligible);
        assert_eq!(record.computed_shard_id(), 1);
        assert_eq!(record.received_shard_id(), 7);
    }

    #[tokio::test]
    async fn unknown_role_defaults_to_observer() {
        let (monitor, _storage, _clock) = setup();
        monitor.process_received_message(&heartbeat_message("C", 3), &PeerId::ZERO).unwrap();
        monitor.flush().await;

        let record = monitor.peer_record(&key("C")).unwrap();
        assert_eq!(record.peer_type(), PeerType::Observer);
        assert_eq!(record.computed_shard_id(), 0);
        assert!(!record.is_validator());
    }

    #[tokio::test]
    async fn rejected_messages_touch_nothing() {
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let clock = Arc::new(ManualClock::new(start()));

        let monitor = builder(storage.clone(), clock.clone())
            .antiflood(ScriptedAntiflood::reject_topic("heartbeat"))
            .build()
            .unwrap();
        let err = monitor
            .process_received_message(&heartbeat_message("B", 0), &PeerId::ZERO)
            .unwrap_err();
        assert_matches!(err, HeartbeatError::Admission(_));
        assert_eq!(err.to_string(), "topic heartbeat rejected");

        let monitor = builder(storage, clock)
            .antiflood(ScriptedAntiflood::reject_messages())
            .build()
            .unwrap();
        let err = monitor
            .process_received_message(&heartbeat_message("B", 0), &PeerId::ZERO)
            .unwrap_err();
        assert_eq!(err.to_string(), "message rejected");

        let (monitor, _storage, _clock) = setup();
        let garbage = crate::GossipMessage::new(b"garbage".to_vec(), "heartbeat", PeerId::ZERO);
        assert_matches!(
            monitor.process_received_message(&garbage, &PeerId::ZERO),
            Err(HeartbeatError::Decode(_))
        );
        let empty = crate::GossipMessage { data: None, topic: "heartbeat".into(), peer: PeerId::ZERO };
        assert_matches!(
            monitor.process_received_message(&empty, &PeerId::ZERO),
            Err(HeartbeatError::NilDataToProcess)
        );

        monitor.flush().await;
        assert_eq!(monitor.len(), 1);
        assert!(monitor.known_peers().is_empty());
    }

    #[tokio::test]
    async fn storage_failures_keep_in_memory_state() {
        let clock = Arc::new(ManualClock::new(start()));
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let monitor = builder(storage, clock).storage(FailingStorage::new(false)).build().unwrap();

        monitor.process_received_message(&heartbeat_message("A", 0), &PeerId::ZERO).unwrap();
        monitor.flush().await;

        assert!(monitor.peer_record(&key("A")).unwrap().is_active());
        assert_eq!(monitor.known_peers(), vec![key("A")]);
    }

    #[tokio::test]
    async fn restart_credits_offline_window() {
        let (monitor, storage, clock) = setup();
        monitor.process_received_message(&heartbeat_message("A", 0), &PeerId::ZERO).unwrap();
        monitor.process_received_message(&heartbeat_message("B", 1), &PeerId::ZERO).unwrap();
        monitor.flush().await;
        let before = monitor.peer_record(&key("A")).unwrap();
        drop(monitor);

        clock.advance(Duration::from_secs(500));
        let restarted = builder(storage, clock.clone()).build().unwrap();

        let after = restarted.peer_record(&key("A")).unwrap();
        assert!(after.is_active());
        assert_eq!(after.total_up_time(), before.total_up_time() + Duration::from_secs(500));
        assert_eq!(after.total_down_time(), before.total_down_time());
        assert_eq!(after.last_uptime_downtime(), clock.now());

        // B is outside the assignment but was seen before the restart
        assert!(restarted.peer_record(&key("B")).is_some());
        assert_eq!(restarted.known_peers().len(), 2);
        assert_eq!(restarted.shard_members().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_hex_key() {
        let (monitor, _storage, _clock) = setup();
        for name in ["Z", "M", "B"] {
            monitor.add_heartbeat(heartbeat(name, 0));
        }

        let keys: Vec<_> =
            monitor.heartbeat_snapshot().into_iter().map(|peer| peer.hex_public_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 4);
    }

    #[tokio::test]
    async fn evaluation_publishes_counters() {
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let clock = Arc::new(ManualClock::new(start()));
        let metrics = Arc::new(RecordingMetrics::default());
        let monitor = builder(storage, clock).metrics(metrics.clone()).build().unwrap();

        monitor.process_received_message(&heartbeat_message("A", 0), &PeerId::ZERO).unwrap();
        monitor.process_received_message(&heartbeat_message("C", 0), &PeerId::ZERO).unwrap();
        monitor.flush().await;

        let counters = monitor.evaluate_all();
        assert_eq!(counters, LivenessCounters { connected_nodes: 2, live_validators: 1 });
        assert_eq!(metrics.get(CONNECTED_NODES), Some(2));
        assert_eq!(metrics.get(LIVE_VALIDATOR_NODES), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_task_runs_periodically() {
        let storage = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let clock = Arc::new(ManualClock::new(start()));
        let metrics = Arc::new(RecordingMetrics::default());
        let monitor = builder(storage, clock).metrics(metrics.clone()).build().unwrap();

        let task = tokio::spawn(monitor.evaluation_task());
        tokio::time::sleep(monitor.config().evaluation_interval * 2).await;
        assert_eq!(metrics.get(CONNECTED_NODES), Some(0));
        task.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_record_write_does_not_block_other_peers() {
        let (gated, entered) = GatedStorage::new(key("B"));
        let gated = Arc::new(gated);
        let clock = Arc::new(ManualClock::new(start()));
        let unused = Arc::new(KvHeartbeatStorage::new(MemoryKeyValueStore::new()));
        let monitor = builder(unused, clock).storage(gated.clone()).build().unwrap();

        let slow = {
            let monitor = monitor.clone();
            thread::spawn(move || monitor.add_heartbeat(heartbeat("B", 1)))
        };
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        // B's write is parked in storage; B's state, the pass and other peers stay usable
        let (done_tx, done_rx) = mpsc::channel();
        let other = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                let b_active = monitor.peer_record(&key("B")).is_some_and(|r| r.is_active());
                let counters = monitor.evaluate_all();
                monitor.add_heartbeat(heartbeat("N", 0));
                done_tx.send((b_active, counters)).ok();
            })
        };
        let finished = done_rx.recv_timeout(Duration::from_secs(5));

        gated.release();
        slow.join().unwrap();
        other.join().unwrap();
        monitor.flush().await;

        let (b_active, counters) = finished.expect("other peers were blocked by a pending write");
        assert!(b_active);
        assert_eq!(counters.connected_nodes, 1);
        assert!(monitor.peer_record(&key("N")).unwrap().is_active());
        assert!(gated.load_record(b"B").unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn failed_record_load_leaves_stored_history_untouched() {
        let (monitor, storage, clock) = setup();
        monitor.add_heartbeat(heartbeat("A", 0));
        clock.advance(Duration::from_secs(30));
        monitor.evaluate_all();
        monitor.add_heartbeat(heartbeat("A", 0));
        monitor.flush().await;
        drop(monitor);

        let stored = storage.load_record(b"A").unwrap().unwrap();
        assert_eq!(stored.total_up_time, Duration::from_secs(30).as_nanos() as i64);

        clock.advance(Duration::from_secs(100));
        let restarted = builder(storage.clone(), clock)
            .storage(FlakyStorage::new(storage.clone()).fail_record_load(key("A")))
            .build()
            .unwrap();
        restarted.flush().await;

        assert_eq!(storage.load_record(b"A").unwrap(), Some(stored));
        let record = restarted.peer_record(&key("A")).unwrap();
        assert!(!record.is_active());
        assert_eq!(record.total_up_time(), Duration::ZERO);
    }

    #[tokio::test]
    async fn unreadable_known_peer_is_skipped() {
        let (monitor, storage, clock) = setup();
        monitor.add_heartbeat(heartbeat("B", 1));
        monitor.add_heartbeat(heartbeat("C", 2));
        monitor.flush().await;
        drop(monitor);

        let restarted = builder(storage.clone(), clock)
            .storage(FlakyStorage::new(storage).fail_record_load(key("B")))
            .build()
            .unwrap();

        assert!(restarted.peer_record(&key("B")).is_none());
        assert!(restarted.peer_record(&key("C")).is_some());
        assert_eq!(restarted.len(), 2);
        assert_eq!(restarted.known_peers(), vec![key("B"), key("C")]);
    }

    #[tokio::test]
    async fn unreadable_known_peers_list_is_not_fatal() {
        let (monitor, storage, clock) = setup();
        monitor.add_heartbeat(heartbeat("B", 1));
        monitor.flush().await;
        drop(monitor);

        let restarted = builder(storage.clone(), clock)
            .storage(FlakyStorage::new(storage).fail_known_peers_load())
            .build()
            .unwrap();

        assert_eq!(restarted.len(), 1);
        assert!(restarted.peer_record(&key("A")).is_some());
        assert!(restarted.known_peers().is_empty());
    }
}
