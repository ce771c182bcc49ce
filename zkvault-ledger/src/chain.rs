//! Chain-data reads used for enrichment and wallet lookups.

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::id;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Unix timestamp of the block, in seconds.
    async fn block_timestamp(&self, block_number: u64) -> Result<u64, ChainError>;

    async fn transaction_sender(&self, tx_hash: H256) -> Result<Address, ChainError>;

    /// Full transaction object as the provider returns it; `None` if unknown.
    async fn transaction(&self, tx_hash: H256) -> Result<Option<Value>, ChainError>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError>;
}

pub struct RpcChainReader {
    provider: Provider<Http>,
}

impl RpcChainReader {
    pub fn new(rpc_url: &str) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Rpc(format!("invalid RPC URL: {e}")))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_timestamp(&self, block_number: u64) -> Result<u64, ChainError> {
        let block = self
            .provider
            .get_block(block_number)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::NotFound(format!("block {block_number}")))?;
        if block.timestamp > U256::from(u64::MAX) {
            return Err(ChainError::Decode(format!(
                "block {block_number} timestamp out of range"
            )));
        }
        Ok(block.timestamp.as_u64())
    }

    async fn transaction_sender(&self, tx_hash: H256) -> Result<Address, ChainError> {
        self.provider
            .get_transaction(tx_hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .map(|tx| tx.from)
            .ok_or_else(|| ChainError::NotFound(format!("transaction {tx_hash:?}")))
    }

    async fn transaction(&self, tx_hash: H256) -> Result<Option<Value>, ChainError> {
        let tx = self
            .provider
            .get_transaction(tx_hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        tx.map(|tx| serde_json::to_value(tx).map_err(|e| ChainError::Decode(e.to_string())))
            .transpose()
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        let mut data = id("balanceOf(address)").to_vec();
        data.extend_from_slice(&abi::encode(&[Token::Address(owner)]));
        let tx: TypedTransaction = TransactionRequest::new()
            .to(token)
            .data(Bytes::from(data))
            .into();

        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Rpc(format!("balanceOf failed: {e}")))?;

        match abi::decode(&[ParamType::Uint(256)], &output)
            .map_err(|e| ChainError::Decode(format!("balanceOf returned {output}: {e}")))?
            .pop()
        {
            Some(Token::Uint(balance)) => Ok(balance),
            other => Err(ChainError::Decode(format!("balanceOf returned {other:?}"))),
        }
    }
}
