//! Commodity dealer for secure inner products
//!
//! The dealer hands each party one half of a correlation
//! `⟨R_a, R_b⟩ = r_a + r_b` before the session starts and takes no further
//! part. With it, A holding x and B holding y obtain additive shares of
//! ⟨x, y⟩ after exchanging the masked vectors `x + R_a` and `y + R_b`:
//!
//! - A: `r_a − ⟨R_a, y + R_b⟩`
//! - B: `⟨x + R_a, y⟩ + r_b`
//!
//! The final shares travel padded. The pads stay with the dealer's
//! [`ShareEscrow`] until both parties have deposited the digests of what
//! they sent and received; only then can either side unpad the other's share.

use crate::digest::Digest;
use crate::error::{DlrsError, Result};
use crate::zk::codec::to_hex;
use crate::zk::{inner_product, random_scalar};
use ark_bn254::Fr;
use ark_ff::Zero;
use log::warn;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// One party's half of an inner-product correlation
#[derive(Clone)]
pub struct InnerProductShare {
    mask: Vec<Fr>,
    offset: Fr,
}

impl InnerProductShare {
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.mask.len() {
            return Err(DlrsError::ComputationAborted(format!(
                "correlated randomness covers {} entries, got {}",
                self.mask.len(),
                len
            )));
        }
        Ok(())
    }

    /// x + R
    pub fn mask(&self, x: &[Fr]) -> Result<Vec<Fr>> {
        self.check_len(x.len())?;
        Ok(x.iter().zip(&self.mask).map(|(x, r)| *x + r).collect())
    }

    /// A's share: r_a − ⟨R_a, ŷ⟩
    pub fn initiator_share(&self, masked_y: &[Fr]) -> Result<Fr> {
        self.check_len(masked_y.len())?;
        Ok(self.offset - inner_product(&self.mask, masked_y))
    }

    /// B's share: ⟨x̂, y⟩ + r_b
    pub fn responder_share(&self, masked_x: &[Fr], y: &[Fr]) -> Result<Fr> {
        self.check_len(masked_x.len())?;
        self.check_len(y.len())?;
        Ok(inner_product(masked_x, y) + self.offset)
    }
}

impl Drop for InnerProductShare {
    fn drop(&mut self) {
        for r in self.mask.iter_mut() {
            *r = Fr::zero();
        }
        self.offset = Fr::zero();
    }
}

/// Which end of a session a party runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    fn index(self) -> usize {
        match self {
            Role::Initiator => 0,
            Role::Responder => 1,
        }
    }

    fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Digest of a padded share as it went over the wire
pub fn share_digest(value: &Fr, blinding: &Fr) -> Digest {
    Digest::of_parts(
        b"dlrs/padded-share",
        &[to_hex(value).as_bytes(), to_hex(blinding).as_bytes()],
    )
}

#[derive(Clone, Copy)]
struct Pad {
    value: Fr,
    blinding: Fr,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Deposit {
    sent: Digest,
    received: Digest,
}

/// Dealer-held pads of the final share exchange
///
/// The verdict is `Some(true)` once both deposits agree, `Some(false)` if
/// they disagree; pads are only handed out after `Some(true)`.
pub struct ShareEscrow {
    pads: [Pad; 2],
    deposits: Mutex<[Option<Deposit>; 2]>,
    verdict: watch::Sender<Option<bool>>,
}

impl ShareEscrow {
    fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let pads = [
            Pad {
                value: random_scalar(rng),
                blinding: random_scalar(rng),
            },
            Pad {
                value: random_scalar(rng),
                blinding: random_scalar(rng),
            },
        ];
        let (verdict, _) = watch::channel(None);
        Self {
            pads,
            deposits: Mutex::new([None, None]),
            verdict,
        }
    }

    /// Record what `role` sent and received; settles the verdict once both
    /// parties have deposited
    pub fn deposit(&self, role: Role, sent: Digest, received: Digest) {
        let mut deposits = self.deposits.lock().unwrap_or_else(PoisonError::into_inner);
        if deposits[role.index()].is_some() {
            warn!("Second escrow deposit from the {:?} ignored", role);
            return;
        }
        deposits[role.index()] = Some(Deposit { sent, received });
        if let [Some(a), Some(b)] = *deposits {
            let agreed = a.sent == b.received && b.sent == a.received;
            if !agreed {
                warn!("Escrow deposits disagree; pads stay sealed");
            }
            self.verdict.send_replace(Some(agreed));
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<bool>> {
        self.verdict.subscribe()
    }

    pub fn is_released(&self) -> bool {
        *self.verdict.borrow() == Some(true)
    }

    /// Unpad the share received by `role`
    pub fn unpad_peer(&self, role: Role, value: &Fr, blinding: &Fr) -> Result<(Fr, Fr)> {
        if !self.is_released() {
            return Err(DlrsError::ComputationAborted(
                "escrow has not released the peer's pad".into(),
            ));
        }
        let pad = self.pads[role.peer().index()];
        Ok((*value - pad.value, *blinding - pad.blinding))
    }
}

impl Drop for ShareEscrow {
    fn drop(&mut self) {
        for pad in self.pads.iter_mut() {
            pad.value = Fr::zero();
            pad.blinding = Fr::zero();
        }
    }
}

/// Correlations for one session: one for the values, one for the blindings,
/// plus this party's access to the share escrow
#[derive(Clone)]
pub struct SessionRandomness {
    pub value: InnerProductShare,
    pub blinding: InnerProductShare,
    pub role: Role,
    pub escrow: Arc<ShareEscrow>,
}

impl SessionRandomness {
    /// Own final share plus own pad, ready to send
    pub fn pad_share(&self, value: &Fr, blinding: &Fr) -> (Fr, Fr) {
        let pad = self.escrow.pads[self.role.index()];
        (*value + pad.value, *blinding + pad.blinding)
    }

    pub fn deposit(&self, sent: Digest, received: Digest) {
        self.escrow.deposit(self.role, sent, received);
    }

    pub fn unpad_peer(&self, value: &Fr, blinding: &Fr) -> Result<(Fr, Fr)> {
        self.escrow.unpad_peer(self.role, value, blinding)
    }
}

pub struct Dealer;

impl Dealer {
    pub fn inner_product<R: Rng + ?Sized>(
        len: usize,
        rng: &mut R,
    ) -> (InnerProductShare, InnerProductShare) {
        let mask_a: Vec<Fr> = (0..len).map(|_| random_scalar(rng)).collect();
        let mask_b: Vec<Fr> = (0..len).map(|_| random_scalar(rng)).collect();
        let offset_a = random_scalar(rng);
        let offset_b = inner_product(&mask_a, &mask_b) - offset_a;
        (
            InnerProductShare {
                mask: mask_a,
                offset: offset_a,
            },
            InnerProductShare {
                mask: mask_b,
                offset: offset_b,
            },
        )
    }

    /// Randomness for the initiator and the responder of a session over `len` entries
    pub fn session<R: Rng + ?Sized>(len: usize, rng: &mut R) -> (SessionRandomness, SessionRandomness) {
        let (value_a, value_b) = Self::inner_product(len, rng);
        let (blinding_a, blinding_b) = Self::inner_product(len, rng);
        let escrow = Arc::new(ShareEscrow::new(rng));
        (
            SessionRandomness {
                value: value_a,
                blinding: blinding_a,
                role: Role::Initiator,
                escrow: Arc::clone(&escrow),
            },
            SessionRandomness {
                value: value_b,
                blinding: blinding_b,
                role: Role::Responder,
                escrow,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_reconstruct_inner_product() {
        let mut rng = rand::thread_rng();
        let n = 7;
        let x: Vec<Fr> = (0..n).map(|_| random_scalar(&mut rng)).collect();
        let y: Vec<Fr> = (0..n).map(|_| random_scalar(&mut rng)).collect();
        let (a, b) = Dealer::inner_product(n, &mut rng);

        let x_hat = a.mask(&x).unwrap();
        let y_hat = b.mask(&y).unwrap();
        let share_a = a.initiator_share(&y_hat).unwrap();
        let share_b = b.responder_share(&x_hat, &y).unwrap();
        assert_eq!(share_a + share_b, inner_product(&x, &y));
    }

    #[test]
    fn test_escrow_releases_on_agreement() {
        let mut rng = rand::thread_rng();
        let (a, b) = Dealer::session(2, &mut rng);
        let (share_a, share_b) = (random_scalar(&mut rng), random_scalar(&mut rng));
        let sent_a = a.pad_share(&share_a, &Fr::zero());
        let sent_b = b.pad_share(&share_b, &Fr::zero());
        let digest_a = share_digest(&sent_a.0, &sent_a.1);
        let digest_b = share_digest(&sent_b.0, &sent_b.1);

        a.deposit(digest_a, digest_b);
        assert!(a.unpad_peer(&sent_b.0, &sent_b.1).is_err());
        b.deposit(digest_b, digest_a);
        assert!(a.escrow.is_released());
        assert_eq!(a.unpad_peer(&sent_b.0, &sent_b.1).unwrap().0, share_b);
        assert_eq!(b.unpad_peer(&sent_a.0, &sent_a.1).unwrap().0, share_a);
    }

    #[test]
    fn test_escrow_stays_sealed_on_disagreement() {
        let mut rng = rand::thread_rng();
        let (a, b) = Dealer::session(2, &mut rng);
        let x = share_digest(&Fr::zero(), &Fr::zero());
        let y = share_digest(&random_scalar(&mut rng), &Fr::zero());
        a.deposit(x, y);
        b.deposit(x, x);
        assert_eq!(*a.escrow.subscribe().borrow(), Some(false));
        assert!(matches!(
            b.unpad_peer(&Fr::zero(), &Fr::zero()),
            Err(DlrsError::ComputationAborted(_))
        ));
    }

    #[test]
    fn test_length_mismatch_aborts() {
        let (a, _) = Dealer::inner_product(3, &mut rand::thread_rng());
        assert!(matches!(
            a.mask(&[Fr::zero(); 4]),
            Err(DlrsError::ComputationAborted(_))
        ));
    }
}
