//! Two-party session messages
//!
//! Order: Hello → HelloAck → Expression (A then B) → MaskedA → MaskedB → Link
//! → Shares (A then B, both padded by the dealer escrow). `Abort` may be
//! sent at any point.

use crate::digest::Digest;
use crate::zk::codec::canonical;
use crate::zk::{ExpressionProof, LinkProof};
use ark_bn254::{Fr, G1Affine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionMessage {
    Hello {
        session: Uuid,
        params: Digest,
        statement_digest: Digest,
    },
    HelloAck {
        session: Uuid,
        params: Digest,
    },
    Expression {
        #[serde(with = "canonical")]
        proof: ExpressionProof,
    },
    MaskedA {
        #[serde(with = "canonical")]
        value: Vec<Fr>,
        #[serde(with = "canonical")]
        blinding: Vec<Fr>,
    },
    MaskedB {
        #[serde(with = "canonical")]
        value: Vec<Fr>,
        #[serde(with = "canonical")]
        blinding: Vec<Fr>,
    },
    Link {
        #[serde(with = "canonical")]
        cross: G1Affine,
        #[serde(with = "canonical")]
        proof: LinkProof,
    },
    Shares {
        #[serde(with = "canonical")]
        value: Fr,
        #[serde(with = "canonical")]
        blinding: Fr,
    },
    Abort {
        reason: String,
    },
}

impl SessionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Hello { .. } => "Hello",
            SessionMessage::HelloAck { .. } => "HelloAck",
            SessionMessage::Expression { .. } => "Expression",
            SessionMessage::MaskedA { .. } => "MaskedA",
            SessionMessage::MaskedB { .. } => "MaskedB",
            SessionMessage::Link { .. } => "Link",
            SessionMessage::Shares { .. } => "Shares",
            SessionMessage::Abort { .. } => "Abort",
        }
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
    use ark_ff::One;

    #[test]
    fn test_message_wire_format() {
        let msg = SessionMessage::Shares {
            value: Fr::one(),
            blinding: -Fr::one(),
        };
        let bytes = msg.to_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"type\":\"Shares\""));
        match SessionMessage::from_bytes(&bytes).unwrap() {
            SessionMessage::Shares { value, blinding } => {
                assert_eq!(value, Fr::one());
                assert_eq!(blinding, -Fr::one());
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }
}
