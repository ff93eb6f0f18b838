//! Error taxonomy shared by every DLRS layer

/// Errors raised by factorization, commitments, proofs, sessions and gossip
#[derive(Debug, thiserror::Error)]
pub enum DlrsError {
    #[error("rank unattainable: {0}")]
    RankUnattainable(String),

    #[error("invalid opening: {0}")]
    InvalidOpening(String),

    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    #[error("proof verification failed: {0}")]
    ProofVerificationFailed(String),

    #[error("computation aborted: {0}")]
    ComputationAborted(String),

    #[error("cryptographic parameter mismatch: local {local}, remote {remote}")]
    ParameterMismatch { local: String, remote: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid seed state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("seed not found: {0}")]
    SeedNotFound(String),

    #[error("seed store capacity reached ({0} seeds)")]
    CapacityReached(usize),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DlrsError {
    /// Fatal errors end the session with the peer; everything else is local
    pub fn is_fatal(&self) -> bool {
        matches!(self, DlrsError::ParameterMismatch { .. })
    }

    /// Verification failures mark the sender as untrusted rather than failing the node
    pub fn is_untrusted_peer_signal(&self) -> bool {
        matches!(self, DlrsError::ProofVerificationFailed(_))
    }
}

impl From<serde_json::Error> for DlrsError {
    fn from(e: serde_json::Error) -> Self {
        DlrsError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for DlrsError {
    fn from(e: std::io::Error) -> Self {
        DlrsError::Storage(e.to_string())
    }
}

pub type Result<T, E = DlrsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let mismatch = DlrsError::ParameterMismatch {
            local: "aa".into(),
            remote: "bb".into(),
        };
        assert!(mismatch.is_fatal());
        assert!(!DlrsError::ProofVerificationFailed("x".into()).is_fatal());
        assert!(DlrsError::ProofVerificationFailed("x".into()).is_untrusted_peer_signal());
    }
}
