//! Admission control in front of heartbeat decoding

use crate::{error::BoxError, message::P2pMessage, PeerId};
use auto_impl::auto_impl;
use std::fmt::Debug;

/// Anti-flood gate consulted before a message is decoded.
///
/// Both checks must pass; a rejection is handed back to the transport unchanged.
#[auto_impl(&, Arc, Box)]
pub trait AntifloodHandler: Send + Sync + Debug {
    /// Per-peer flood check for a single message
    fn can_process_message(&self, message: &dyn P2pMessage, from: &PeerId) -> Result<(), BoxError>;

    /// Per-peer flood check scoped to a topic
    fn can_process_message_on_topic(&self, from: &PeerId, topic: &str) -> Result<(), BoxError>;
}

/// Antiflood handler that admits everything
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct DisabledAntiflood;

impl AntifloodHandler for DisabledAntiflood {
    fn can_process_message(&self, _message: &dyn P2pMessage, _from: &PeerId) -> Result<(), BoxError> {
        Ok(())
    }

    fn can_process_message_on_topic(&self, _from: &PeerId, _topic: &str) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GossipMessage, HEARTBEAT_TOPIC};
    use std::sync::Arc;

    #[test]
    fn disabled_antiflood_admits_everything() {
        let antiflood: Arc<dyn AntifloodHandler> = Arc::new(DisabledAntiflood);
        let message = GossipMessage::new(b"{}".to_vec(), HEARTBEAT_TOPIC, PeerId::ZERO);

        assert!(antiflood.can_process_message(&message, &PeerId::ZERO).is_ok());
        assert!(antiflood.can_process_message_on_topic(&PeerId::ZERO, HEARTBEAT_TOPIC).is_ok());
    }
}
