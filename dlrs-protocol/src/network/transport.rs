//! Message transports
//!
//! Sends never block: a full or missing inbox is reported and the caller
//! moves on to the next peer.

use super::protocol::Envelope;
use crate::error::{DlrsError, Result};
use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

pub trait Transport: Send + Sync {
    fn local_id(&self) -> &str;

    /// Peers currently reachable
    fn peers(&self) -> Vec<String>;

    /// Non-blocking delivery of one envelope to one peer
    fn send(&self, to: &str, envelope: Envelope) -> Result<()>;

    /// Send to every reachable peer; returns how many accepted the envelope
    fn broadcast(&self, envelope: Envelope) -> usize {
        let mut delivered = 0;
        for peer in self.peers() {
            match self.send(&peer, envelope.clone().addressed_to(peer.as_str())) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", peer, e),
            }
        }
        delivered
    }
}

/// In-process network of named nodes
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inboxes: Arc<RwLock<HashMap<String, mpsc::Sender<Envelope>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; the receiver is its inbox
    pub fn join(
        &self,
        id: impl Into<String>,
        capacity: usize,
    ) -> (MemoryTransport, mpsc::Receiver<Envelope>) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);
        let transport = MemoryTransport {
            id,
            network: self.clone(),
        };
        (transport, rx)
    }

    pub fn leave(&self, id: &str) {
        self.inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

pub struct MemoryTransport {
    id: String,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> &str {
        &self.id
    }

    fn peers(&self) -> Vec<String> {
        let inboxes = self
            .network
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<String> = inboxes.keys().filter(|p| **p != self.id).cloned().collect();
        peers.sort();
        peers
    }

    fn send(&self, to: &str, envelope: Envelope) -> Result<()> {
        // through the wire format, like a real transport
        let bytes = envelope
            .to_bytes()
            .map_err(|e| DlrsError::Network(format!("encode: {}", e)))?;
        let decoded =
            Envelope::from_bytes(&bytes).map_err(|e| DlrsError::Network(format!("decode: {}", e)))?;
        let inbox = self
            .network
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(to)
            .cloned()
            .ok_or_else(|| DlrsError::Network(format!("unknown peer {}", to)))?;
        inbox
            .try_send(decoded)
            .map_err(|e| DlrsError::Network(format!("{}: {}", to, e)))
    }
}
