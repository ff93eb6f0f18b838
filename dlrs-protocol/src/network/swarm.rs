//! libp2p transport — gossipsub for envelopes, mDNS for discovery
//!
//! Every envelope is published on the DLRS topic; receivers drop envelopes
//! addressed to someone else. The sender field of an inbound envelope is
//! replaced by the gossipsub message source, which is signed.

use super::protocol::{Envelope, DLRS_TOPIC};
use super::transport::Transport;
use crate::error::{DlrsError, Result};
use libp2p::{gossipsub, mdns, noise, swarm::SwarmEvent, tcp, yamux, Multiaddr, Swarm};
use log::{debug, error, info, warn};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Combined behaviour: gossipsub for messaging + mDNS for discovery
#[derive(libp2p::swarm::NetworkBehaviour)]
pub struct DlrsBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
}

#[derive(Debug)]
enum SwarmCommand {
    Publish(Envelope),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Port to listen on (0 = random)
    pub listen_port: u16,
    pub heartbeat_secs: u64,
    /// Capacity of the inbound and command queues
    pub queue_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            heartbeat_secs: 1,
            queue_capacity: 256,
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn build_swarm(config: &SwarmConfig) -> std::result::Result<Swarm<DlrsBehaviour>, BoxError> {
    let swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(|key| {
            // identical payloads are the same message
            let message_id_fn = |message: &gossipsub::Message| {
                let mut s = DefaultHasher::new();
                message.data.hash(&mut s);
                gossipsub::MessageId::from(s.finish().to_string())
            };
            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(config.heartbeat_secs))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| Box::new(e) as BoxError)?;

            let gossipsub = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| Box::new(std::io::Error::new(std::io::ErrorKind::Other, e)) as BoxError)?;

            let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), key.public().to_peer_id())
                .map_err(|e| Box::new(e) as BoxError)?;

            Ok(DlrsBehaviour { gossipsub, mdns })
        })?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();
    Ok(swarm)
}

/// [`Transport`] over a libp2p swarm running in its own task
pub struct Libp2pTransport {
    id: String,
    peers: Arc<RwLock<HashSet<String>>>,
    commands: mpsc::Sender<SwarmCommand>,
}

impl Libp2pTransport {
    /// Build the swarm, start listening and spawn its event loop
    pub fn start(config: SwarmConfig) -> Result<(Self, mpsc::Receiver<Envelope>)> {
        let network = |e: &dyn std::fmt::Display| DlrsError::Network(e.to_string());
        let mut swarm = build_swarm(&config).map_err(|e| network(&e))?;
        let local_peer_id = *swarm.local_peer_id();
        info!("Local peer ID: {}", local_peer_id);

        let topic = gossipsub::IdentTopic::new(DLRS_TOPIC);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| network(&e))?;
        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
            .parse()
            .map_err(|e| network(&e))?;
        swarm.listen_on(listen_addr).map_err(|e| network(&e))?;

        let capacity = config.queue_capacity.max(1);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(capacity);
        let (evt_tx, evt_rx) = mpsc::channel::<Envelope>(capacity);
        let peers = Arc::new(RwLock::new(HashSet::new()));
        let known = Arc::clone(&peers);

        tokio::spawn(async move {
            use futures::StreamExt;
            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        SwarmCommand::Publish(envelope) => match envelope.to_bytes() {
                            Ok(data) => {
                                if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), data) {
                                    warn!("Failed to publish {}: {}", envelope.message.kind(), e);
                                }
                            }
                            Err(e) => error!("Failed to serialize envelope: {}", e),
                        },
                        SwarmCommand::Shutdown => {
                            info!("Swarm shutting down");
                            break;
                        }
                    },
                    event = swarm.select_next_some() => match event {
                        SwarmEvent::Behaviour(DlrsBehaviourEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => match Envelope::from_bytes(&message.data) {
                            Ok(mut envelope) => {
                                if let Some(source) = message.source {
                                    envelope.from = source.to_string();
                                }
                                if let Err(e) = evt_tx.try_send(envelope) {
                                    warn!("Dropping inbound envelope: {}", e);
                                }
                            }
                            Err(e) => warn!("Failed to decode gossipsub message: {}", e),
                        },
                        SwarmEvent::Behaviour(DlrsBehaviourEvent::Mdns(mdns::Event::Discovered(found))) => {
                            for (peer_id, _addr) in found {
                                info!("mDNS discovered peer: {}", peer_id);
                                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                                known
                                    .write()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .insert(peer_id.to_string());
                            }
                        }
                        SwarmEvent::Behaviour(DlrsBehaviourEvent::Mdns(mdns::Event::Expired(lost))) => {
                            for (peer_id, _addr) in lost {
                                info!("mDNS peer expired: {}", peer_id);
                                swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                                known
                                    .write()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .remove(&peer_id.to_string());
                            }
                        }
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!("Listening on {}", address);
                        }
                        _ => {}
                    },
                }
            }
        });

        let transport = Self {
            id: local_peer_id.to_string(),
            peers,
            commands: cmd_tx,
        };
        Ok((transport, evt_rx))
    }

    fn publish(&self, envelope: Envelope) -> Result<()> {
        self.commands
            .try_send(SwarmCommand::Publish(envelope))
            .map_err(|e| DlrsError::Network(format!("swarm queue: {}", e)))
    }

    pub fn shutdown(&self) {
        if self.commands.try_send(SwarmCommand::Shutdown).is_err() {
            debug!("Swarm already stopped");
        }
    }
}

impl Transport for Libp2pTransport {
    fn local_id(&self) -> &str {
        &self.id
    }

    fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        peers.sort();
        peers
    }

    fn send(&self, to: &str, envelope: Envelope) -> Result<()> {
        self.publish(envelope.addressed_to(to))
    }

    /// One publish reaches the whole topic
    fn broadcast(&self, envelope: Envelope) -> usize {
        let reachable = self.peers().len();
        match self.publish(envelope) {
            Ok(()) => reachable,
            Err(e) => {
                warn!("Broadcast failed: {}", e);
                0
            }
        }
    }
}
