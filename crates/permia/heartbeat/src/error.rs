//! Permia heartbeat error types

use thiserror::Error;

/// Boxed error returned by external collaborators (antiflood, decoder, peer type provider).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building the monitor or processing a heartbeat
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// A required collaborator was not supplied to the builder
    #[error("missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The initial shard to public keys assignment is empty
    #[error("empty public keys map")]
    EmptyPublicKeysMap,

    /// The unresponsiveness threshold must be strictly positive
    #[error("invalid max duration for an unresponsive peer")]
    InvalidUnresponsiveDuration,

    /// No tokio runtime is available for background work
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The received message carries no payload
    #[error("nil data to process")]
    NilDataToProcess,

    /// The antiflood handler rejected the message
    #[error(transparent)]
    Admission(BoxError),

    /// The heartbeat payload could not be decoded
    #[error(transparent)]
    Decode(BoxError),

    /// Storage failure during construction
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by the heartbeat persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Stored bytes could not be encoded or decoded
    #[error("heartbeat codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The underlying key-value backend failed
    #[error("heartbeat storage backend error: {0}")]
    Backend(String),
}
