//! Network module — gossip distribution of DLRS seeds
//!
//! A [`GossipNode`] runs over any [`Transport`]: the libp2p swarm for real
//! deployments or the in-memory network for tests and demos.

mod gossip;
mod protocol;
mod swarm;
mod transport;
mod view;

pub use gossip::{GossipNode, NodeHandle};
pub use protocol::{Envelope, GossipMessage, SeedFingerprint, DLRS_TOPIC, PROTOCOL_VERSION};
pub use swarm::{Libp2pTransport, SwarmConfig};
pub use transport::{MemoryNetwork, MemoryTransport, Transport};
pub use view::{PeerInfo, PeerView, StoredSeed};
