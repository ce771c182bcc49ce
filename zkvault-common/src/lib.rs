//! zkvault-common
//!
//! Primitives shared by the relayer, the ledger and the HTTP backend:
//! circom-compatible field hashing of usernames and credentials, the proof
//! object accepted from the external prover, and the error taxonomy every
//! crate reports into.

use thiserror::Error;

pub mod hasher;
pub mod proof;

pub use hasher::{
    credential_hash, field_of, identity_hash, poseidon, result_hash, FieldElement, HashError,
};
pub use proof::{format, FormattedProof, ProofError, ProofInput, ProofObject};

/// Token symbol reported by balance endpoints unless configured otherwise.
pub const DEFAULT_TOKEN_SYMBOL: &str = "USDC";

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure classes surfaced to callers of the vault services.
///
/// A log whose signature the vault does not emit is not an error and never
/// appears here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZkVaultError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("identity {0} is already registered")]
    AlreadyRegistered(String),

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("gas estimation failed: {0}")]
    EstimationFailed(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("timed out waiting for receipt: {0}")]
    ReceiptTimeout(String),

    #[error("operation failed on-chain: {0}")]
    ReceiptFailed(String),

    #[error("ledger write failed: {0}")]
    StoreWriteFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<ProofError> for ZkVaultError {
    fn from(err: ProofError) -> Self {
        match err {
            ProofError::Malformed(message) => ZkVaultError::MalformedProof(message),
        }
    }
}

impl From<HashError> for ZkVaultError {
    fn from(err: HashError) -> Self {
        ZkVaultError::InvalidInput(err.to_string())
    }
}
