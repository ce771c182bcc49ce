//! Failure classes of a sponsored submission.

use ethers::types::H256;
use thiserror::Error;
use zkvault_common::ZkVaultError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relayer misconfigured: {0}")]
    Config(String),

    #[error("failed to prepare smart account: {0}")]
    Account(String),

    #[error("gas estimation failed: {0}")]
    EstimationFailed(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("no receipt for user operation {hash:?} within {waited_secs}s")]
    ReceiptTimeout { hash: H256, waited_secs: u64 },

    #[error("receipt failed: {0}")]
    ReceiptFailed(String),
}

impl From<RelayError> for ZkVaultError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::Config(_)
            | RelayError::Account(_)
            | RelayError::SubmissionRejected(_) => {
                ZkVaultError::SubmissionRejected(message)
            }
            RelayError::EstimationFailed(_) => ZkVaultError::EstimationFailed(message),
            RelayError::ReceiptTimeout { .. } => ZkVaultError::ReceiptTimeout(message),
            RelayError::ReceiptFailed(_) => ZkVaultError::ReceiptFailed(message),
        }
    }
}
