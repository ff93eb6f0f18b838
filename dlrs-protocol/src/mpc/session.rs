//! Two-party session driver
//!
//! Runs a [`BilinearPredicate`] between the owners of two seeds. Each side
//! holds only its own opening; the dealer's correlated randomness turns the
//! cross term into additive shares that are exchanged last, padded, and
//! unpadded only once the dealer's escrow has seen both deposits. Every wait
//! is bounded by the link timeout and the shared cancellation signal. Any
//! failure sends `Abort` to the peer, drops all secret session state and
//! returns an error; no partial result is ever returned.

use super::dealer::{share_digest, SessionRandomness};
use super::messages::SessionMessage;
use crate::config::SessionConfig;
use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::zk::bilinear::{
    commitments_of, opens_cross, prove_link, prove_party, verify_link, verify_party,
    weighted_values, BilinearPredicate, BilinearProof, Side,
};
use crate::zk::codec::to_hex;
use crate::zk::{random_scalar, statement_transcript, OpeningSecret, Transcript, ZkContext};
use ark_bn254::Fr;
use ark_ff::Zero;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Cancels every link created with it; either side may hold a clone
#[derive(Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn aborted(reason: impl Into<String>) -> DlrsError {
    DlrsError::ComputationAborted(reason.into())
}

/// One end of a duplex session channel
pub struct Link {
    tx: mpsc::Sender<SessionMessage>,
    rx: mpsc::Receiver<SessionMessage>,
    cancel: watch::Receiver<bool>,
    timeout: Duration,
}

impl Link {
    /// Connected in-process pair sharing one cancellation signal
    pub fn pair(config: &SessionConfig) -> (Link, Link, Canceller) {
        let canceller = Canceller::new();
        let (tx_ab, rx_ab) = mpsc::channel(config.channel_capacity);
        let (tx_ba, rx_ba) = mpsc::channel(config.channel_capacity);
        let a = Link::from_parts(tx_ab, rx_ba, &canceller, config.timeout());
        let b = Link::from_parts(tx_ba, rx_ab, &canceller, config.timeout());
        (a, b, canceller)
    }

    /// Wrap channels bridged to some other transport
    pub fn from_parts(
        tx: mpsc::Sender<SessionMessage>,
        rx: mpsc::Receiver<SessionMessage>,
        canceller: &Canceller,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            rx,
            cancel: canceller.subscribe(),
            timeout,
        }
    }

    pub async fn send(&mut self, message: SessionMessage) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(aborted("session cancelled"));
        }
        tokio::select! {
            _ = cancelled(&mut self.cancel) => Err(aborted("session cancelled")),
            sent = tokio::time::timeout(self.timeout, self.tx.send(message)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(aborted("peer disconnected")),
                Err(_) => Err(aborted("timed out sending to peer")),
            },
        }
    }

    pub async fn recv(&mut self) -> Result<SessionMessage> {
        if *self.cancel.borrow() {
            return Err(aborted("session cancelled"));
        }
        tokio::select! {
            _ = cancelled(&mut self.cancel) => Err(aborted("session cancelled")),
            received = tokio::time::timeout(self.timeout, self.rx.recv()) => match received {
                Ok(Some(SessionMessage::Abort { reason })) => {
                    Err(aborted(format!("peer aborted: {}", reason)))
                }
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(aborted("peer disconnected")),
                Err(_) => Err(aborted("timed out waiting for peer")),
            },
        }
    }

    /// Wait for the escrow verdict; the peer's abort or disconnect ends the
    /// wait early
    pub async fn await_release(&mut self, randomness: &SessionRandomness) -> Result<()> {
        let mut verdict = randomness.escrow.subscribe();
        let released = async move {
            verdict
                .wait_for(|v| v.is_some())
                .await
                .map(|v| *v == Some(true))
        };
        tokio::select! {
            biased;
            released = tokio::time::timeout(self.timeout, released) => match released {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err(aborted("escrow refused: exchanged shares differ")),
                Ok(Err(_)) => Err(aborted("escrow closed")),
                Err(_) => Err(aborted("timed out waiting for the escrow")),
            },
            _ = cancelled(&mut self.cancel) => Err(aborted("session cancelled")),
            message = self.rx.recv() => match message {
                Some(SessionMessage::Abort { reason }) => {
                    Err(aborted(format!("peer aborted: {}", reason)))
                }
                Some(other) => Err(aborted(format!(
                    "unexpected {} while waiting for the escrow",
                    other.kind()
                ))),
                None => Err(aborted("peer disconnected")),
            },
        }
    }

    /// Best-effort notification; the peer may already be gone
    pub fn abort(&self, reason: &str) {
        let _ = self.tx.try_send(SessionMessage::Abort {
            reason: reason.to_string(),
        });
    }
}

macro_rules! expect_message {
    ($link:expr, $variant:ident { $($field:ident),+ }) => {
        match $link.recv().await? {
            SessionMessage::$variant { $($field),+ } => ($($field),+),
            other => {
                return Err(aborted(format!(
                    "expected {}, got {}",
                    stringify!($variant),
                    other.kind()
                )))
            }
        }
    };
}

/// Digest both sides compare to make sure they prove the same statement
fn statement_digest(base: &Transcript) -> Digest {
    let challenge = base.fork(b"handshake").challenge_scalar(b"statement");
    Digest::of_parts(b"dlrs/session-statement", &[to_hex(&challenge).as_bytes()])
}

/// Result of a completed session; identical on both sides
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: Uuid,
    pub score: f64,
    pub proof: BilinearProof,
}

/// Values the responder must not keep after the session
struct ResponderSecrets {
    weighted: Vec<Fr>,
    mu: Fr,
}

impl Drop for ResponderSecrets {
    fn drop(&mut self) {
        for x in self.weighted.iter_mut() {
            *x = Fr::zero();
        }
        self.mu = Fr::zero();
    }
}

fn assemble(
    ctx: &ZkContext,
    expr_a: crate::zk::ExpressionProof,
    expr_b: crate::zk::ExpressionProof,
    cross: ark_bn254::G1Affine,
    link: crate::zk::LinkProof,
    score: Fr,
    blinding: Fr,
) -> Result<BilinearProof> {
    if !opens_cross(ctx, &cross, &score, &blinding) {
        return Err(DlrsError::ProofVerificationFailed(
            "combined shares do not open the cross commitment".into(),
        ));
    }
    Ok(BilinearProof {
        expr_a,
        expr_b,
        cross,
        link,
        score,
        blinding,
    })
}

async fn run_initiator<P: BilinearPredicate>(
    ctx: &ZkContext,
    link: &mut Link,
    statement: &P::Statement,
    secret: &OpeningSecret,
    randomness: &SessionRandomness,
    session: Uuid,
) -> Result<BilinearProof> {
    let mut rng = StdRng::from_entropy();
    let cross_term = P::bilinear(ctx, statement)?;
    let base = statement_transcript::<P>(ctx, statement)?;

    link.send(SessionMessage::Hello {
        session,
        params: ctx.fingerprint(),
        statement_digest: statement_digest(&base),
    })
    .await?;
    let (acked, params) = expect_message!(link, HelloAck { session, params });
    if acked != session {
        return Err(aborted("peer acknowledged another session"));
    }
    ctx.params.ensure_matches(&params)?;

    let (expr_a, witness_a) = prove_party(ctx, &base, Side::A, &cross_term, secret, &mut rng)?;
    link.send(SessionMessage::Expression {
        proof: expr_a.clone(),
    })
    .await?;
    let expr_b = expect_message!(link, Expression { proof });
    let e_b = verify_party(ctx, &base, Side::B, &cross_term, &expr_b)?;
    let e_a = commitments_of(ctx, &witness_a);

    link.send(SessionMessage::MaskedA {
        value: randomness.value.mask(&witness_a.values)?,
        blinding: randomness.blinding.mask(&witness_a.blindings)?,
    })
    .await?;
    drop(witness_a);

    let (masked_value, masked_blinding) = expect_message!(link, MaskedB { value, blinding });
    let (cross, link_proof) = expect_message!(link, Link { cross, proof });
    if !verify_link(ctx, &base, &cross_term, &e_a, &e_b, &cross, &link_proof) {
        return Err(DlrsError::ProofVerificationFailed(
            "peer's cross commitment is not linked to its expression".into(),
        ));
    }

    let own_value = randomness.value.initiator_share(&masked_value)?;
    let own_blinding = randomness.blinding.initiator_share(&masked_blinding)?;
    let (sent_value, sent_blinding) = randomness.pad_share(&own_value, &own_blinding);
    link.send(SessionMessage::Shares {
        value: sent_value,
        blinding: sent_blinding,
    })
    .await?;
    let (padded_value, padded_blinding) = expect_message!(link, Shares { value, blinding });
    randomness.deposit(
        share_digest(&sent_value, &sent_blinding),
        share_digest(&padded_value, &padded_blinding),
    );
    link.await_release(randomness).await?;
    let (peer_value, peer_blinding) = randomness.unpad_peer(&padded_value, &padded_blinding)?;

    assemble(
        ctx,
        expr_a,
        expr_b,
        cross,
        link_proof,
        own_value + peer_value,
        own_blinding + peer_blinding,
    )
}

async fn run_responder<P: BilinearPredicate>(
    ctx: &ZkContext,
    link: &mut Link,
    statement: &P::Statement,
    secret: &OpeningSecret,
    randomness: &SessionRandomness,
    session_id: &mut Uuid,
) -> Result<BilinearProof> {
    let mut rng = StdRng::from_entropy();
    let cross_term = P::bilinear(ctx, statement)?;
    let base = statement_transcript::<P>(ctx, statement)?;

    let (session, params, statement_digest_remote) =
        expect_message!(link, Hello { session, params, statement_digest });
    *session_id = session;
    link.send(SessionMessage::HelloAck {
        session,
        params: ctx.fingerprint(),
    })
    .await?;
    ctx.params.ensure_matches(&params)?;
    if statement_digest_remote != statement_digest(&base) {
        return Err(DlrsError::InvalidInput(
            "peer is proving a different statement".into(),
        ));
    }

    let expr_a = expect_message!(link, Expression { proof });
    let e_a = verify_party(ctx, &base, Side::A, &cross_term, &expr_a)?;
    let (expr_b, witness_b) = prove_party(ctx, &base, Side::B, &cross_term, secret, &mut rng)?;
    link.send(SessionMessage::Expression {
        proof: expr_b.clone(),
    })
    .await?;

    let (masked_value, masked_blinding) = expect_message!(link, MaskedA { value, blinding });
    let secrets = ResponderSecrets {
        weighted: weighted_values(&cross_term, &witness_b),
        mu: random_scalar(&mut rng),
    };
    link.send(SessionMessage::MaskedB {
        value: randomness.value.mask(&secrets.weighted)?,
        blinding: randomness.blinding.mask(&secrets.weighted)?,
    })
    .await?;

    let (cross, link_proof) =
        prove_link(ctx, &base, &cross_term, &e_a, &witness_b, &secrets.mu, &mut rng)?;
    drop(witness_b);
    link.send(SessionMessage::Link {
        cross,
        proof: link_proof.clone(),
    })
    .await?;

    let (padded_value, padded_blinding) = expect_message!(link, Shares { value, blinding });
    let own_value = randomness
        .value
        .responder_share(&masked_value, &secrets.weighted)?;
    let own_blinding = randomness
        .blinding
        .responder_share(&masked_blinding, &secrets.weighted)?
        + secrets.mu;
    drop(secrets);
    let (sent_value, sent_blinding) = randomness.pad_share(&own_value, &own_blinding);
    link.send(SessionMessage::Shares {
        value: sent_value,
        blinding: sent_blinding,
    })
    .await?;
    randomness.deposit(
        share_digest(&sent_value, &sent_blinding),
        share_digest(&padded_value, &padded_blinding),
    );
    link.await_release(randomness).await?;
    let (peer_value, peer_blinding) = randomness.unpad_peer(&padded_value, &padded_blinding)?;

    assemble(
        ctx,
        expr_a,
        expr_b,
        cross,
        link_proof,
        own_value + peer_value,
        own_blinding + peer_blinding,
    )
}

fn finish<P: BilinearPredicate>(
    ctx: &ZkContext,
    link: &Link,
    statement: &P::Statement,
    session: Uuid,
    result: Result<BilinearProof>,
) -> Result<SessionOutcome> {
    match result {
        Ok(proof) => {
            let score = P::bilinear(ctx, statement)?.decode(ctx, &proof.score);
            info!("Session {} complete (score {:.6})", session, score);
            Ok(SessionOutcome {
                session,
                score,
                proof,
            })
        }
        Err(e) => {
            warn!("Session {} aborted: {}", session, e);
            link.abort(&e.to_string());
            Err(e)
        }
    }
}

/// Run as party A, the owner of `statement`'s first commitment
pub async fn initiate<P: BilinearPredicate>(
    ctx: &ZkContext,
    link: &mut Link,
    statement: &P::Statement,
    secret: &OpeningSecret,
    randomness: SessionRandomness,
) -> Result<SessionOutcome> {
    let session = Uuid::new_v4();
    debug!("Session {} starting as initiator", session);
    let result = run_initiator::<P>(ctx, link, statement, secret, &randomness, session).await;
    drop(randomness);
    finish::<P>(ctx, link, statement, session, result)
}

/// Run as party B, the owner of `statement`'s second commitment
pub async fn respond<P: BilinearPredicate>(
    ctx: &ZkContext,
    link: &mut Link,
    statement: &P::Statement,
    secret: &OpeningSecret,
    randomness: SessionRandomness,
) -> Result<SessionOutcome> {
    let mut session = Uuid::nil();
    let result =
        run_responder::<P>(ctx, link, statement, secret, &randomness, &mut session).await;
    drop(randomness);
    finish::<P>(ctx, link, statement, session, result)
}
