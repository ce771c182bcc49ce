//! ERC-4337 (entry point v0.6) user operations.

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// Sponsored transaction wrapper handed to the bundler.
///
/// Serialized in the bundler RPC shape: camelCase keys, hex quantities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Hash the owner signs; excludes the signature itself.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let packed = abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ]);

        H256(keccak256(abi::encode(&[
            Token::FixedBytes(keccak256(packed).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ])))
    }

    pub fn apply_gas(&mut self, estimate: &GasEstimate) {
        self.pre_verification_gas = estimate.pre_verification_gas;
        self.verification_gas_limit = estimate.verification_gas_limit;
        self.call_gas_limit = estimate.call_gas_limit;
    }

    pub fn apply_fees(&mut self, fees: &FeeEstimate) {
        self.max_fee_per_gas = fees.max_fee_per_gas;
        self.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
    }
}

/// Result of `eth_estimateUserOperationGas`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Which paymaster call a sponsorship request maps to (ERC-7677).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SponsorPhase {
    /// Placeholder data good enough for gas estimation.
    Stub,
    /// Signed data for the final, gas-populated operation.
    Final,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludedTransaction {
    pub transaction_hash: H256,
}

/// Result of `eth_getUserOperationReceipt` once the operation is included.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: IncludedTransaction,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x11),
            nonce: U256::zero(),
            init_code: Bytes::from(vec![0xaa; 24]),
            call_data: Bytes::from(vec![0xbb; 36]),
            call_gas_limit: U256::from(100_000u64),
            verification_gas_limit: U256::from(200_000u64),
            pre_verification_gas: U256::from(50_000u64),
            max_fee_per_gas: U256::from(1_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000u64),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        }
    }

    #[test]
    fn hash_ignores_signature() {
        let entry_point = Address::repeat_byte(0x22);
        let op = sample();
        let mut signed = op.clone();
        signed.signature = Bytes::from(vec![1, 2, 3]);
        assert_eq!(op.hash(entry_point, 84532), signed.hash(entry_point, 84532));
    }

    #[test]
    fn hash_binds_gas_and_chain() {
        let entry_point = Address::repeat_byte(0x22);
        let op = sample();
        let mut bumped = op.clone();
        bumped.pre_verification_gas = U256::from(100_000u64);

        assert_ne!(op.hash(entry_point, 84532), bumped.hash(entry_point, 84532));
        assert_ne!(op.hash(entry_point, 84532), op.hash(entry_point, 8453));
    }

    #[test]
    fn serializes_in_bundler_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["preVerificationGas"], "0xc350");
        assert_eq!(value["paymasterAndData"], "0x");
        assert!(value.get("pre_verification_gas").is_none());
    }

    #[test]
    fn parses_bundler_receipt() {
        let json = serde_json::json!({
            "userOpHash": format!("0x{}", "ab".repeat(32)),
            "entryPoint": "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789",
            "success": true,
            "actualGasUsed": "0x1",
            "receipt": {
                "transactionHash": format!("0x{}", "cd".repeat(32)),
                "blockNumber": "0x10"
            }
        });
        let receipt: UserOperationReceipt = serde_json::from_value(json).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.receipt.transaction_hash, H256::repeat_byte(0xcd));
    }
}
