//! Peer roles and the provider that resolves them.

use crate::error::BoxError;
use alloy_primitives::{hex, Bytes};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fmt::Debug};
use thiserror::Error;

/// Role of a public key in the current epoch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    /// Validator taking part in consensus
    Eligible,
    /// Validator waiting to become eligible
    Waiting,
    /// Any other peer. Unknown persisted roles decode to this.
    #[default]
    #[serde(other)]
    Observer,
}

impl PeerType {
    /// Whether this role counts as a validator for liveness metrics
    pub const fn is_validator(&self) -> bool {
        matches!(self, Self::Eligible | Self::Waiting)
    }

    /// Role name as exported in snapshots
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Waiting => "waiting",
            Self::Observer => "observer",
        }
    }
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the role and shard of a public key.
#[auto_impl(&, Arc, Box)]
pub trait PeerTypeProvider: Send + Sync + Debug {
    /// Compute role and shard for a public key
    fn compute_for_pub_key(&self, pub_key: &[u8]) -> Result<(PeerType, u32), BoxError>;

    /// Compute the role of a public key previously observed in `shard_id`
    fn compute_for_pub_key_in_shard(
        &self,
        pub_key: &[u8],
        shard_id: u32,
    ) -> Result<PeerType, BoxError>;
}

/// Errors returned by [`StaticPeerTypeProvider`]
#[derive(Debug, Error)]
pub enum PeerTypeError {
    /// Public key is neither eligible nor waiting
    #[error("public key {0} not found in the nodes setup")]
    UnknownPublicKey(String),
}

/// Peer type provider over a fixed eligible/waiting assignment.
#[derive(Debug, Clone, Default)]
pub struct StaticPeerTypeProvider {
    eligible: BTreeMap<u32, Vec<Bytes>>,
    waiting: BTreeMap<u32, Vec<Bytes>>,
}

impl StaticPeerTypeProvider {
    /// Create a provider from eligible and waiting lists keyed by shard
    pub const fn new(
        eligible: BTreeMap<u32, Vec<Bytes>>,
        waiting: BTreeMap<u32, Vec<Bytes>>,
    ) -> Self {
        Self { eligible, waiting }
    }

    fn find(map: &BTreeMap<u32, Vec<Bytes>>, pub_key: &[u8]) -> Option<u32> {
        map.iter()
            .find(|(_, keys)| keys.iter().any(|k| k.as_ref() == pub_key))
            .map(|(shard, _)| *shard)
    }

    fn in_shard(map: &BTreeMap<u32, Vec<Bytes>>, pub_key: &[u8], shard_id: u32) -> bool {
        map.get(&shard_id).is_some_and(|keys| keys.iter().any(|k| k.as_ref() == pub_key))
    }
}

impl PeerTypeProvider for StaticPeerTypeProvider {
    fn compute_for_pub_key(&self, pub_key: &[u8]) -> Result<(PeerType, u32), BoxError> {
        if let Some(shard) = Self::find(&self.eligible, pub_key) {
            return Ok((PeerType::Eligible, shard));
        }
        if let Some(shard) = Self::find(&self.waiting, pub_key) {
            return Ok((PeerType::Waiting, shard));
        }
        Err(Box::new(PeerTypeError::UnknownPublicKey(hex::encode(pub_key))))
    }

    fn compute_for_pub_key_in_shard(
        &self,
        pub_key: &[u8],
        shard_id: u32,
    ) -> Result<PeerType, BoxError> {
        // The shard hint only short-circuits the lookup, validators may have moved.
        if Self::in_shard(&self.eligible, pub_key, shard_id) {
            return Ok(PeerType::Eligible);
        }
        if Self::in_shard(&self.waiting, pub_key, shard_id) {
            return Ok(PeerType::Waiting);
        }
        self.compute_for_pub_key(pub_key).map(|(peer_type, _)| peer_type)
    }
}
