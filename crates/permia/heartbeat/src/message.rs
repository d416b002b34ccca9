//! Heartbeat payloads and the decoder turning gossip messages into them.

use crate::error::BoxError;
use alloy_primitives::{Bytes, B512};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Identity of a connected peer (the 64 byte node public key)
pub type PeerId = B512;

/// Message delivered by the gossip layer
pub trait P2pMessage: Send + Sync + Debug {
    /// Raw payload, `None` if the message carried none
    fn data(&self) -> Option<&Bytes>;

    /// Topic the message was received on
    fn topic(&self) -> &str;

    /// Peer that originated the message
    fn peer(&self) -> PeerId;
}

/// Plain [`P2pMessage`] implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMessage {
    /// Message payload
    pub data: Option<Bytes>,
    /// Gossip topic
    pub topic: String,
    /// Originating peer
    pub peer: PeerId,
}

impl GossipMessage {
    /// Create a message with a payload
    pub fn new(data: impl Into<Bytes>, topic: impl Into<String>, peer: PeerId) -> Self {
        Self { data: Some(data.into()), topic: topic.into(), peer }
    }
}

impl P2pMessage for GossipMessage {
    fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn peer(&self) -> PeerId {
        self.peer
    }
}

/// Liveness proof broadcast periodically by every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Opaque payload chosen by the sender
    #[serde(default)]
    pub payload: Bytes,
    /// Public key of the sender
    pub pubkey: Bytes,
    /// Shard the sender believes it is in
    pub shard_id: u32,
    /// Software version of the sender
    #[serde(default)]
    pub version_number: String,
    /// Human readable node name
    #[serde(default)]
    pub node_display_name: String,
}

/// Turns a validated gossip message into a typed [`Heartbeat`].
#[auto_impl(&, Arc, Box)]
pub trait HeartbeatDecoder: Send + Sync + Debug {
    /// Decode the heartbeat carried by `message`
    fn create_heartbeat(&self, message: &dyn P2pMessage) -> Result<Heartbeat, BoxError>;
}

/// Size limits enforced when decoding heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatLimits {
    /// Maximum size of the opaque payload
    pub max_payload_size: usize,
    /// Maximum size of the public key
    pub max_pubkey_size: usize,
    /// Maximum length of the version string
    pub max_version_length: usize,
    /// Maximum length of the display name
    pub max_display_name_length: usize,
}

impl Default for HeartbeatLimits {
    fn default() -> Self {
        Self {
            max_payload_size: 1024,
            max_pubkey_size: 1024,
            max_version_length: 128,
            max_display_name_length: 128,
        }
    }
}

/// Errors returned by [`JsonHeartbeatDecoder`]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The message had no payload
    #[error("message has no data")]
    MissingData,

    /// The payload is not a valid heartbeat
    #[error("malformed heartbeat: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The public key is empty
    #[error("heartbeat has an empty public key")]
    EmptyPublicKey,

    /// A field exceeds its configured size limit
    #[error("heartbeat field {field} too long: {len} > {max}")]
    FieldTooLong {
        /// Offending field
        field: &'static str,
        /// Actual length
        len: usize,
        /// Configured maximum
        max: usize,
    },
}

/// Decoder for JSON encoded heartbeats.
///
/// Signatures are not checked here; authenticity is the transport's concern.
#[derive(Debug, Clone, Default)]
pub struct JsonHeartbeatDecoder {
    limits: HeartbeatLimits,
}

impl JsonHeartbeatDecoder {
    /// Create a decoder enforcing `limits`
    pub const fn new(limits: HeartbeatLimits) -> Self {
        Self { limits }
    }

    /// Decode and validate raw bytes
    pub fn decode(&self, data: &[u8]) -> Result<Heartbeat, DecodeError> {
        let heartbeat: Heartbeat = serde_json::from_slice(data)?;
        self.verify_lengths(&heartbeat)?;
        Ok(heartbeat)
    }

    fn verify_lengths(&self, heartbeat: &Heartbeat) -> Result<(), DecodeError> {
        if heartbeat.pubkey.is_empty() {
            return Err(DecodeError::EmptyPublicKey);
        }
        let checks = [
            ("payload", heartbeat.payload.len(), self.limits.max_payload_size),
            ("pubkey", heartbeat.pubkey.len(), self.limits.max_pubkey_size),
            ("version_number", heartbeat.version_number.len(), self.limits.max_version_length),
            (
                "node_display_name",
                heartbeat.node_display_name.len(),
                self.limits.max_display_name_length,
            ),
        ];
        for (field, len, max) in checks {
            if len > max {
                return Err(DecodeError::FieldTooLong { field, len, max });
            }
        }
        Ok(())
    }
}

impl HeartbeatDecoder for JsonHeartbeatDecoder {
    fn create_heartbeat(&self, message: &dyn P2pMessage) -> Result<Heartbeat, BoxError> {
        let data = message.data().ok_or(DecodeError::MissingData)?;
        Ok(self.decode(data)?)
    }
}
