//! One sponsored vault call, from calldata to settlement transaction.
//!
//! Stages run strictly in order: `Built → GasEstimated → Submitted →
//! Finalized`, with any error moving the request to `Failed`. Nothing is
//! retried here; an already-submitted operation cannot be pulled back, so a
//! timeout only stops waiting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::account::AccountFactory;
use crate::bundler::Relayer;
use crate::calls::CallDescriptor;
use crate::error::RelayError;
use crate::user_op::{GasEstimate, SponsorPhase, UserOperation, UserOperationReceipt};

pub const DEFAULT_PRE_VERIFICATION_GAS_MULTIPLIER: u64 = 2;
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Built,
    GasEstimated,
    Submitted,
    Finalized,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Built => "built",
            Stage::GasEstimated => "gas_estimated",
            Stage::Submitted => "submitted",
            Stage::Finalized => "finalized",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Over-provisioning applied to the bundler's estimate.
///
/// Only `preVerificationGas` is scaled; the other limits pass through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasPolicy {
    pub pre_verification_gas_multiplier: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            pre_verification_gas_multiplier: DEFAULT_PRE_VERIFICATION_GAS_MULTIPLIER,
        }
    }
}

impl GasPolicy {
    pub fn adjust(&self, estimate: GasEstimate) -> GasEstimate {
        GasEstimate {
            pre_verification_gas: estimate
                .pre_verification_gas
                .saturating_mul(U256::from(self.pre_verification_gas_multiplier)),
            ..estimate
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub entry_point: Address,
    pub chain_id: u64,
    pub gas_policy: GasPolicy,
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
}

/// Identifiers reported back to the caller once the operation settles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayOutcome {
    /// User-operation hash assigned by the bundler.
    pub bundler_tx_hash: H256,
    /// Ephemeral smart account that executed the call.
    pub sender: Address,
    /// Settlement transaction hash.
    pub tx_hash: H256,
}

pub struct RelayPipeline {
    relayer: Arc<dyn Relayer>,
    accounts: Arc<dyn AccountFactory>,
    config: PipelineConfig,
}

impl RelayPipeline {
    pub fn new(
        relayer: Arc<dyn Relayer>,
        accounts: Arc<dyn AccountFactory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            relayer,
            accounts,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes one call through a fresh smart account.
    pub async fn execute(&self, call: CallDescriptor) -> Result<RelayOutcome, RelayError> {
        let target = call.to;
        let result = self.run(call).await;
        if let Err(err) = &result {
            warn!(stage = %Stage::Failed, target = ?target, error = %err, "relay pipeline failed");
        }
        result
    }

    async fn run(&self, call: CallDescriptor) -> Result<RelayOutcome, RelayError> {
        let account = self.accounts.create().await?;
        let sender = account.address();

        let mut op = UserOperation {
            sender,
            nonce: account.nonce(),
            init_code: account.init_code(),
            call_data: account.encode_calls(&[call]),
            signature: account.stub_signature(),
            ..Default::default()
        };
        let fees = self.relayer.fee_estimate().await?;
        op.apply_fees(&fees);
        info!(stage = %Stage::Built, sender = ?sender, "user operation built");

        op.paymaster_and_data = self.relayer.sponsor(&op, SponsorPhase::Stub).await?;
        let estimate = self.relayer.estimate_gas(&op).await?;
        let adjusted = self.config.gas_policy.adjust(estimate);
        op.apply_gas(&adjusted);
        info!(
            stage = %Stage::GasEstimated,
            sender = ?sender,
            estimated_pre_verification_gas = %estimate.pre_verification_gas,
            pre_verification_gas = %adjusted.pre_verification_gas,
            verification_gas_limit = %adjusted.verification_gas_limit,
            call_gas_limit = %adjusted.call_gas_limit,
            "gas estimated"
        );

        op.paymaster_and_data = self.relayer.sponsor(&op, SponsorPhase::Final).await?;
        let op_hash = op.hash(self.config.entry_point, self.config.chain_id);
        op.signature = account.sign_user_op_hash(op_hash)?;

        let bundler_tx_hash = self.relayer.send(&op).await?;
        info!(stage = %Stage::Submitted, sender = ?sender, user_op_hash = ?bundler_tx_hash, "user operation submitted");

        let receipt = self.await_receipt(bundler_tx_hash).await?;
        if !receipt.success {
            return Err(RelayError::ReceiptFailed(format!(
                "user operation {:?} reverted: {}",
                bundler_tx_hash,
                receipt.reason.as_deref().unwrap_or("no reason given")
            )));
        }

        let tx_hash = receipt.receipt.transaction_hash;
        info!(stage = %Stage::Finalized, sender = ?sender, tx_hash = ?tx_hash, "user operation finalized");

        Ok(RelayOutcome {
            bundler_tx_hash,
            sender,
            tx_hash,
        })
    }

    async fn await_receipt(&self, hash: H256) -> Result<UserOperationReceipt, RelayError> {
        let poll = async {
            loop {
                if let Some(receipt) = self.relayer.receipt(hash).await? {
                    return Ok(receipt);
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };

        tokio::time::timeout(self.config.receipt_timeout, poll)
            .await
            .map_err(|_| RelayError::ReceiptTimeout {
                hash,
                waited_secs: self.config.receipt_timeout.as_secs(),
            })?
    }
}
