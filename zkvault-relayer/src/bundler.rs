//! Bundler and paymaster JSON-RPC client.

use async_trait::async_trait;
use ethers::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::RelayError;
use crate::user_op::{FeeEstimate, GasEstimate, SponsorPhase, UserOperation, UserOperationReceipt};

/// Relayer operations the pipeline depends on.
#[async_trait]
pub trait Relayer: Send + Sync {
    async fn fee_estimate(&self) -> Result<FeeEstimate, RelayError>;

    /// Returns `paymasterAndData` sponsoring the operation.
    async fn sponsor(&self, op: &UserOperation, phase: SponsorPhase) -> Result<Bytes, RelayError>;

    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimate, RelayError>;

    /// Returns the user-operation hash; does not imply inclusion.
    async fn send(&self, op: &UserOperation) -> Result<H256, RelayError>;

    /// `None` while the operation is still pending.
    async fn receipt(&self, hash: H256) -> Result<Option<UserOperationReceipt>, RelayError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymasterResult {
    paymaster_and_data: Bytes,
}

/// ERC-4337 bundler with an ERC-7677 paymaster behind the same endpoint.
pub struct BundlerClient {
    client: reqwest::Client,
    bundler_url: String,
    provider: Provider<Http>,
    entry_point: Address,
    chain_id: u64,
}

impl BundlerClient {
    pub fn new(
        bundler_url: String,
        rpc_url: &str,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayError::Config(format!("failed to create HTTP client: {e}")))?;
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| RelayError::Config(format!("invalid RPC URL: {e}")))?;

        Ok(Self {
            client,
            bundler_url,
            provider,
            entry_point,
            chain_id,
        })
    }

    /// Make a JSON-RPC call; errors carry the bundler's own message.
    async fn rpc_call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, String> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        debug!(method, "bundler request");

        let response = self
            .client
            .post(&self.bundler_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("{method}: request failed: {e}"))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| format!("{method}: unreadable response: {e}"))?;

        if let Some(error) = body.error {
            return Err(format!("{method}: {} (code {})", error.message, error.code));
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| format!("{method}: unexpected result: {e}"))
    }

    fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

#[async_trait]
impl Relayer for BundlerClient {
    async fn fee_estimate(&self) -> Result<FeeEstimate, RelayError> {
        let (max_fee_per_gas, max_priority_fee_per_gas) = self
            .provider
            .estimate_eip1559_fees(None)
            .await
            .map_err(|e| RelayError::EstimationFailed(format!("fee estimation: {e}")))?;
        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn sponsor(&self, op: &UserOperation, phase: SponsorPhase) -> Result<Bytes, RelayError> {
        let method = match phase {
            SponsorPhase::Stub => "pm_getPaymasterStubData",
            SponsorPhase::Final => "pm_getPaymasterData",
        };
        let result: PaymasterResult = self
            .rpc_call(method, json!([op, self.entry_point, self.chain_id_hex(), {}]))
            .await
            .map_err(|e| RelayError::SubmissionRejected(format!("sponsorship denied: {e}")))?;
        Ok(result.paymaster_and_data)
    }

    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimate, RelayError> {
        self.rpc_call("eth_estimateUserOperationGas", json!([op, self.entry_point]))
            .await
            .map_err(RelayError::EstimationFailed)
    }

    async fn send(&self, op: &UserOperation) -> Result<H256, RelayError> {
        self.rpc_call("eth_sendUserOperation", json!([op, self.entry_point]))
            .await
            .map_err(RelayError::SubmissionRejected)
    }

    async fn receipt(&self, hash: H256) -> Result<Option<UserOperationReceipt>, RelayError> {
        self.rpc_call("eth_getUserOperationReceipt", json!([hash]))
            .await
            .map_err(RelayError::ReceiptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_rpc_url_is_a_configuration_error() {
        let err = BundlerClient::new(
            "http://localhost:4337".into(),
            "not a url",
            Address::zero(),
            84532,
        )
        .err()
        .unwrap();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("invalid RPC URL"));
    }

    #[test]
    fn rpc_error_body_parses() {
        let body: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32500, "message": "AA21 didn't pay prefund" }
        }))
        .unwrap();
        let error = body.error.unwrap();
        assert_eq!(error.code, -32500);
        assert!(error.message.contains("AA21"));
        assert!(body.result.is_none());
    }

    #[test]
    fn pending_receipt_is_null() {
        let body: RpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "result": null })).unwrap();
        let receipt: Option<UserOperationReceipt> =
            serde_json::from_value(body.result.unwrap_or(Value::Null)).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn gas_estimate_parses_hex_quantities() {
        let estimate: GasEstimate = serde_json::from_value(json!({
            "preVerificationGas": "0x5208",
            "verificationGasLimit": "0x186a0",
            "callGasLimit": "0x30d40"
        }))
        .unwrap();
        assert_eq!(estimate.pre_verification_gas, U256::from(21_000u64));
        assert_eq!(estimate.call_gas_limit, U256::from(200_000u64));
    }

    #[test]
    fn chain_id_is_hex_encoded() {
        let client = BundlerClient::new(
            "http://localhost:8545".into(),
            "http://localhost:8545",
            Address::zero(),
            84532,
        )
        .unwrap();
        assert_eq!(client.chain_id_hex(), "0x14a34");
    }
}
