//! zkvault-relayer
//!
//! Gas-sponsored submission of proof-gated vault calls.
//!
//! # Architecture
//!
//! A request turns a formatted proof into one vault call and carries it
//! through an ERC-4337 bundler:
//!
//! 1. [`calls::VaultCall`] encodes `register`, `pay` or `withdraw` calldata.
//! 2. [`account::EphemeralAccountFactory`] generates a throwaway owner key and
//!    resolves the counterfactual smart account it controls.
//! 3. [`pipeline::RelayPipeline`] builds the user operation, obtains paymaster
//!    sponsorship, estimates gas (scaling `preVerificationGas` by the
//!    [`pipeline::GasPolicy`]), signs, submits and waits for the receipt.
//!
//! The bundler is reached through the [`bundler::Relayer`] trait so the
//! pipeline can run against any ERC-4337 endpoint or a test double.

pub mod account;
pub mod bundler;
pub mod calls;
pub mod error;
pub mod pipeline;
pub mod user_op;

pub use account::{AccountFactory, CoinbaseSmartAccount, EphemeralAccountFactory, SmartAccount};
pub use bundler::{BundlerClient, Relayer};
pub use calls::{CallDescriptor, VaultCall};
pub use error::RelayError;
pub use pipeline::{GasPolicy, PipelineConfig, RelayOutcome, RelayPipeline, Stage};
pub use user_op::{
    FeeEstimate, GasEstimate, IncludedTransaction, SponsorPhase, UserOperation,
    UserOperationReceipt,
};

/// ERC-4337 v0.6 entry point, identical across chains.
pub const DEFAULT_ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

/// Coinbase smart wallet factory.
pub const DEFAULT_ACCOUNT_FACTORY: &str = "0x0BA5ED0c6AA8c49038F819E587E2633c4A9F428a";

/// Base Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 84532;
