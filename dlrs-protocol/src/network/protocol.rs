//! DLRS gossip protocol messages
//!
//! Every message travels in an [`Envelope`] serialized as JSON. Seeds carry
//! their commitment and proofs in canonical hex form.

use crate::digest::Digest;
use crate::mpc::SessionMessage;
use crate::seed::Seed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version carried in every envelope
pub const PROTOCOL_VERSION: u32 = 1;

/// DLRS gossipsub topic name
pub const DLRS_TOPIC: &str = "dlrs/seeds/v1";

/// Hash-sized announcement of a seed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedFingerprint {
    pub seed_id: String,
    pub fitness: f64,
    pub domains: Vec<String>,
    pub epoch: u64,
}

impl From<&Seed> for SeedFingerprint {
    fn from(seed: &Seed) -> Self {
        Self {
            seed_id: seed.id(),
            fitness: seed.fitness,
            domains: seed.domains.clone(),
            epoch: seed.epoch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GossipMessage {
    /// Fingerprint of the sender's cryptographic parameters
    Hello { params: Digest },
    FingerprintAnnounce { fingerprint: SeedFingerprint },
    SeedRequest { seed_id: String },
    SeedPayload { seed: Box<Seed> },
    /// One message of a two-party session on `channel`
    Session {
        channel: Uuid,
        message: SessionMessage,
    },
}

impl GossipMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipMessage::Hello { .. } => "Hello",
            GossipMessage::FingerprintAnnounce { .. } => "FingerprintAnnounce",
            GossipMessage::SeedRequest { .. } => "SeedRequest",
            GossipMessage::SeedPayload { .. } => "SeedPayload",
            GossipMessage::Session { .. } => "Session",
        }
    }
}

/// A complete DLRS network message with envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID
    pub id: String,
    /// Sender peer ID
    pub from: String,
    /// Recipient peer ID; None for broadcasts
    pub to: Option<String>,
    pub message: GossipMessage,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
}

impl Envelope {
    pub fn new(from: impl Into<String>, message: GossipMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: None,
            message,
            timestamp: Utc::now(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn addressed_to(mut self, peer: impl Into<String>) -> Self {
        self.to = Some(peer.into());
        self
    }

    /// Whether a node with `local_id` should process this envelope
    pub fn is_for(&self, local_id: &str) -> bool {
        self.to.as_deref().map_or(true, |to| to == local_id)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announce_wire_format() {
        let msg = Envelope::new(
            "peer-123",
            GossipMessage::FingerprintAnnounce {
                fingerprint: SeedFingerprint {
                    seed_id: "ab".repeat(32),
                    fitness: 0.85,
                    domains: vec!["ai".to_string(), "crypto".to_string()],
                    epoch: 4,
                },
            },
        );
        let bytes = msg.to_bytes().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"type\":\"FingerprintAnnounce\""));

        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.from, "peer-123");
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        match decoded.message {
            GossipMessage::FingerprintAnnounce { fingerprint } => {
                assert_eq!(fingerprint.epoch, 4);
                assert_eq!(fingerprint.domains.len(), 2);
            }
            other => panic!("Wrong message type {}", other.kind()),
        }
    }

    #[test]
    fn test_addressing() {
        let broadcast = Envelope::new("a", GossipMessage::SeedRequest { seed_id: "x".into() });
        assert!(broadcast.is_for("b"));
        let direct = broadcast.addressed_to("c");
        assert!(direct.is_for("c"));
        assert!(!direct.is_for("b"));
    }

    #[test]
    fn test_session_wire_format() {
        let channel = Uuid::new_v4();
        let msg = Envelope::new(
            "a",
            GossipMessage::Session {
                channel,
                message: SessionMessage::Abort {
                    reason: "bye".into(),
                },
            },
        )
        .addressed_to("b");
        let bytes = msg.to_bytes().unwrap();
        match Envelope::from_bytes(&bytes).unwrap().message {
            GossipMessage::Session { channel: c, message } => {
                assert_eq!(c, channel);
                assert_eq!(message.kind(), "Abort");
            }
            other => panic!("Wrong message type {}", other.kind()),
        }
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::from_bytes(b"{\"type\":\"Hello\"}").is_err());
        assert!(Envelope::from_bytes(b"not json").is_err());
    }
}
