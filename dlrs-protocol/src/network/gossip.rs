//! Gossip engine
//!
//! Push fingerprints, pull payloads. A node announces the seeds it holds to a
//! random subset of peers, requests announced seeds it wants, and admits a
//! payload only after verifying every proof it carries. Peers whose payloads
//! fail verification collect strikes and are ignored once they reach the
//! configured limit.
//!
//! Two-party sessions ride the same transport: each session gets a channel
//! id, and its messages are bridged into a [`Link`] on both nodes.

use super::protocol::{Envelope, GossipMessage, SeedFingerprint, PROTOCOL_VERSION};
use super::transport::Transport;
use super::view::PeerView;
use crate::config::{GossipConfig, LifecycleConfig, SessionConfig};
use crate::error::{DlrsError, Result};
use crate::mpc::{Canceller, Link, SessionMessage};
use crate::seed::{Feedback, FitnessPolicy, MutationTrigger, OwnedSeed, PruneReason, Seed};
use crate::zk::ZkContext;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Sessions opened by peers that nobody has accepted yet
const INCOMING_SESSIONS: usize = 16;

struct PendingRequest {
    peer: String,
    since: Instant,
}

struct SessionRoute {
    peer: String,
    inbound: mpsc::Sender<SessionMessage>,
}

type Routes = Arc<Mutex<HashMap<Uuid, SessionRoute>>>;

/// A two-party session with a remote peer, bridged over gossip
pub struct RemoteSession {
    pub peer: String,
    pub channel: Uuid,
    pub link: Link,
    pub canceller: Canceller,
}

pub struct GossipNode {
    ctx: Arc<ZkContext>,
    gossip: GossipConfig,
    lifecycle: LifecycleConfig,
    session: SessionConfig,
    view: Arc<PeerView>,
    transport: Arc<dyn Transport>,
    /// Seed id -> outstanding request
    requested: Mutex<HashMap<String, PendingRequest>>,
    routes: Routes,
    incoming: mpsc::Sender<RemoteSession>,
    incoming_rx: AsyncMutex<mpsc::Receiver<RemoteSession>>,
}

impl GossipNode {
    pub fn new(
        ctx: Arc<ZkContext>,
        gossip: GossipConfig,
        lifecycle: LifecycleConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let view = Arc::new(PeerView::new(gossip.max_seeds, gossip.max_strikes));
        let (incoming, incoming_rx) = mpsc::channel(INCOMING_SESSIONS);
        Self {
            ctx,
            gossip,
            lifecycle,
            session: SessionConfig::default(),
            view,
            transport,
            requested: Mutex::new(HashMap::new()),
            routes: Arc::new(Mutex::new(HashMap::new())),
            incoming,
            incoming_rx: AsyncMutex::new(incoming_rx),
        }
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn id(&self) -> &str {
        self.transport.local_id()
    }

    pub fn view(&self) -> &Arc<PeerView> {
        &self.view
    }

    pub fn context(&self) -> &ZkContext {
        &self.ctx
    }

    pub async fn add_seed(&self, seed: OwnedSeed) -> Result<String> {
        self.view.insert_owned(seed).await
    }

    /// Feed back observations to an owned seed
    pub async fn evolve(
        &self,
        id: &str,
        feedback: &Feedback,
        policy: &dyn FitnessPolicy,
        trigger: &dyn MutationTrigger,
    ) -> Result<String> {
        self.view
            .evolve(
                &self.ctx,
                id,
                feedback,
                policy,
                trigger,
                self.lifecycle.attestation_margin,
            )
            .await
    }

    fn envelope(&self, message: GossipMessage) -> Envelope {
        Envelope::new(self.id(), message)
    }

    fn hello_message(&self) -> GossipMessage {
        GossipMessage::Hello {
            params: self.ctx.fingerprint(),
        }
    }

    /// Broadcast our parameter fingerprint
    pub fn hello(&self) -> usize {
        self.transport.broadcast(self.envelope(self.hello_message()))
    }

    /// Send our fingerprints to up to `fanout` random trusted peers; returns
    /// the number of envelopes delivered
    pub async fn announce_round(&self) -> usize {
        let mut trusted = Vec::new();
        for peer in self.transport.peers() {
            if self.view.is_trusted(&peer).await {
                trusted.push(peer);
            }
        }
        let targets: Vec<String> = {
            let mut rng = rand::thread_rng();
            trusted
                .choose_multiple(&mut rng, self.gossip.fanout)
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            debug!("No peers to announce to");
            return 0;
        }

        let fingerprints = self.view.announceable().await;
        let mut delivered = 0;
        for peer in &targets {
            for fingerprint in &fingerprints {
                let envelope = self
                    .envelope(GossipMessage::FingerprintAnnounce {
                        fingerprint: fingerprint.clone(),
                    })
                    .addressed_to(peer.as_str());
                match self.transport.send(peer, envelope) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!("Announce to {} failed: {}", peer, e);
                        break;
                    }
                }
            }
        }
        debug!(
            "Announced {} seeds to {} peers",
            fingerprints.len(),
            targets.len()
        );
        delivered
    }

    /// Re-evaluate retention and drop seed requests nobody answered
    pub async fn lifecycle_round(&self) -> Vec<(String, PruneReason)> {
        let expired = self.expire_requests();
        if expired > 0 {
            debug!("{} seed requests expired unanswered", expired);
        }
        self.view.prune(&self.lifecycle).await
    }

    fn expire_requests(&self) -> usize {
        let timeout = self.gossip.request_timeout();
        let mut requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
        let before = requested.len();
        requested.retain(|_, pending| pending.since.elapsed() < timeout);
        before - requested.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn wants(&self, fingerprint: &SeedFingerprint) -> bool {
        if fingerprint.fitness < self.gossip.min_fitness {
            return false;
        }
        if fingerprint.domains.is_empty() {
            return self.gossip.interested_domains.is_empty();
        }
        fingerprint
            .domains
            .iter()
            .any(|d| self.gossip.is_interested_in(d))
    }

    fn reply(&self, to: &str, message: GossipMessage) -> Result<()> {
        self.transport
            .send(to, self.envelope(message).addressed_to(to))
    }

    /// Process one inbound envelope
    ///
    /// Errors describe what was wrong with the message; the node itself stays
    /// healthy either way.
    pub async fn handle(&self, envelope: Envelope) -> Result<()> {
        if !envelope.is_for(self.id()) || envelope.from == self.id() {
            return Ok(());
        }
        if envelope.version != PROTOCOL_VERSION {
            warn!(
                "Dropping {} from {}: protocol version {}",
                envelope.message.kind(),
                envelope.from,
                envelope.version
            );
            return Ok(());
        }
        let from = envelope.from;

        if let GossipMessage::Hello { params } = envelope.message {
            let compatible = self.ctx.params.ensure_matches(&params);
            let first = self
                .view
                .record_hello(&from, params, compatible.is_ok())
                .await;
            if first {
                if let Err(e) = self.reply(&from, self.hello_message()) {
                    warn!("Hello reply to {} failed: {}", from, e);
                }
            }
            if compatible.is_ok() {
                debug!("Peer {} speaks our parameters", from);
            }
            return compatible;
        }

        if !self.view.is_trusted(&from).await {
            debug!("Ignoring {} from {}", envelope.message.kind(), from);
            return Ok(());
        }
        self.view.touch_peer(&from).await;

        match envelope.message {
            GossipMessage::Hello { .. } => Ok(()),
            GossipMessage::FingerprintAnnounce { fingerprint } => {
                if !self.wants(&fingerprint) || self.view.contains(&fingerprint.seed_id).await {
                    return Ok(());
                }
                {
                    let timeout = self.gossip.request_timeout();
                    let mut requested =
                        self.requested.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(pending) = requested.get(&fingerprint.seed_id) {
                        if pending.since.elapsed() < timeout {
                            return Ok(());
                        }
                        debug!(
                            "Request for {} to {} went unanswered",
                            fingerprint.seed_id, pending.peer
                        );
                    }
                    requested.insert(
                        fingerprint.seed_id.clone(),
                        PendingRequest {
                            peer: from.clone(),
                            since: Instant::now(),
                        },
                    );
                }
                debug!("Requesting seed {} from {}", fingerprint.seed_id, from);
                let request = GossipMessage::SeedRequest {
                    seed_id: fingerprint.seed_id.clone(),
                };
                self.reply(&from, request).map_err(|e| {
                    self.requested
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&fingerprint.seed_id);
                    e
                })
            }
            GossipMessage::SeedRequest { seed_id } => match self.view.get(&seed_id).await {
                Some(seed) => self.reply(
                    &from,
                    GossipMessage::SeedPayload {
                        seed: Box::new(seed),
                    },
                ),
                None => {
                    debug!("Peer {} asked for unknown seed {}", from, seed_id);
                    Ok(())
                }
            },
            GossipMessage::SeedPayload { seed } => self.receive_payload(&from, *seed).await,
            GossipMessage::Session { channel, message } => {
                self.route_session(&from, channel, message);
                Ok(())
            }
        }
    }

    /// Open a session channel to `peer`; run `mpc::initiate` on its link
    pub async fn connect_session(&self, peer: &str) -> Result<RemoteSession> {
        if !self.view.is_trusted(peer).await {
            return Err(DlrsError::Network(format!("peer {} is not trusted", peer)));
        }
        Ok(self.bridge(peer, Uuid::new_v4(), None))
    }

    /// Next session a peer opened with us; run `mpc::respond` on its link
    pub async fn accept_session(&self) -> Option<RemoteSession> {
        self.incoming_rx.lock().await.recv().await
    }

    pub fn open_sessions(&self) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wire a session channel to the transport; the route lives until the
    /// link is dropped or the peer becomes unreachable
    fn bridge(&self, peer: &str, channel: Uuid, first: Option<SessionMessage>) -> RemoteSession {
        let capacity = self.session.channel_capacity.max(1);
        let (inbound, link_rx) = mpsc::channel(capacity);
        let (link_tx, mut outbound) = mpsc::channel::<SessionMessage>(capacity);
        if let Some(message) = first {
            let _ = inbound.try_send(message);
        }
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                channel,
                SessionRoute {
                    peer: peer.to_string(),
                    inbound,
                },
            );

        let transport = Arc::clone(&self.transport);
        let routes = Arc::clone(&self.routes);
        let local = self.id().to_string();
        let target = peer.to_string();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let envelope =
                    Envelope::new(local.as_str(), GossipMessage::Session { channel, message })
                        .addressed_to(target.as_str());
                if let Err(e) = transport.send(&target, envelope) {
                    warn!("Session {} to {} lost: {}", channel, target, e);
                    break;
                }
            }
            routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&channel);
            debug!("Session channel {} closed", channel);
        });

        let canceller = Canceller::new();
        let link = Link::from_parts(link_tx, link_rx, &canceller, self.session.timeout());
        RemoteSession {
            peer: peer.to_string(),
            channel,
            link,
            canceller,
        }
    }

    fn route_session(&self, from: &str, channel: Uuid, message: SessionMessage) {
        {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(route) = routes.get(&channel) {
                if route.peer != from {
                    warn!("Peer {} wrote into session {} of {}", from, channel, route.peer);
                    return;
                }
                let sent = route.inbound.try_send(message);
                match sent {
                    Ok(()) => {}
                    Err(TrySendError::Full(message)) => {
                        warn!("Session {} inbox full, dropped {}", channel, message.kind());
                    }
                    Err(TrySendError::Closed(_)) => {
                        routes.remove(&channel);
                    }
                }
                return;
            }
        }

        if !matches!(message, SessionMessage::Hello { .. }) {
            debug!("{} for unknown session {} from {}", message.kind(), channel, from);
            return;
        }
        let session = self.bridge(from, channel, Some(message));
        match self.incoming.try_send(session) {
            Ok(()) => info!("Peer {} opened session {}", from, channel),
            Err(_) => {
                warn!("Refusing session {} from {}: no one is accepting", channel, from);
                let abort = GossipMessage::Session {
                    channel,
                    message: SessionMessage::Abort {
                        reason: "session refused".into(),
                    },
                };
                if let Err(e) = self.reply(from, abort) {
                    debug!("Abort to {} failed: {}", from, e);
                }
            }
        }
    }

    async fn receive_payload(&self, from: &str, seed: Seed) -> Result<()> {
        let id = seed.id();
        let solicited = {
            let mut requested = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
            match requested.get(&id) {
                Some(pending) if pending.peer == from => requested.remove(&id).is_some(),
                _ => false,
            }
        };
        if !solicited {
            debug!("Unsolicited payload {} from {}", id, from);
            return Ok(());
        }

        let ctx = Arc::clone(&self.ctx);
        let lifecycle = self.lifecycle.clone();
        let (seed, verdict) = tokio::task::spawn_blocking(move || {
            let verdict = seed.verify(&ctx, &lifecycle);
            (seed, verdict)
        })
        .await
        .map_err(|e| DlrsError::ComputationAborted(format!("verifier task: {}", e)))?;

        if let Err(e) = verdict {
            let strikes = self.view.strike(from).await;
            warn!(
                "Rejected seed {} from {} ({} strikes): {}",
                id, from, strikes, e
            );
            return Err(e);
        }
        self.view.accept(seed).await?;
        Ok(())
    }

    /// Spawn the announce, inbound and lifecycle tasks
    pub fn start(self: Arc<Self>, mut inbound: mpsc::Receiver<Envelope>) -> NodeHandle {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        let delivered = self.hello();
        info!("Node {} started, greeted {} peers", self.id(), delivered);

        let node = Arc::clone(&self);
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.gossip.announce_interval());
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        node.announce_round().await;
                    }
                }
            }
        }));

        let node = Arc::clone(&self);
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    envelope = inbound.recv() => match envelope {
                        Some(envelope) => {
                            let kind = envelope.message.kind();
                            if let Err(e) = node.handle(envelope).await {
                                warn!("{} handling failed: {}", kind, e);
                            }
                        }
                        None => {
                            error!("Inbox of {} closed", node.id());
                            break;
                        }
                    },
                }
            }
        }));

        let node = self;
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.gossip.lifecycle_interval());
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        let pruned = node.lifecycle_round().await;
                        if !pruned.is_empty() {
                            info!("Lifecycle pruned {} seeds", pruned.len());
                        }
                    }
                }
            }
        }));

        NodeHandle { shutdown, tasks }
    }
}

/// Running tasks of a started node
pub struct NodeHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Node task failed: {}", e);
            }
        }
    }
}
