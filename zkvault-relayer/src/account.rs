//! Disposable smart accounts.
//!
//! Every submission gets a freshly generated owner key and the counterfactual
//! smart account it controls. The key lives only as long as the request; no
//! long-lived privileged key is needed because the paymaster sponsors gas.

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::id;
use tracing::debug;

use crate::calls::CallDescriptor;
use crate::error::RelayError;

const GET_ADDRESS_SIGNATURE: &str = "getAddress(bytes[],uint256)";
const CREATE_ACCOUNT_SIGNATURE: &str = "createAccount(bytes[],uint256)";
const EXECUTE_SIGNATURE: &str = "execute(address,uint256,bytes)";
const EXECUTE_BATCH_SIGNATURE: &str = "executeBatch((address,uint256,bytes)[])";

/// Account abstraction seen by the pipeline.
pub trait SmartAccount: Send + Sync {
    fn address(&self) -> Address;

    /// Deployment code; non-empty while the account is counterfactual.
    fn init_code(&self) -> Bytes;

    fn nonce(&self) -> U256 {
        U256::zero()
    }

    fn encode_calls(&self, calls: &[CallDescriptor]) -> Bytes;

    /// Well-formed signature used while estimating gas.
    fn stub_signature(&self) -> Bytes;

    fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes, RelayError>;
}

/// Creates one disposable account per submission.
#[async_trait]
pub trait AccountFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn SmartAccount>, RelayError>;
}

/// Coinbase-style smart wallet owned by a single ephemeral key.
pub struct CoinbaseSmartAccount {
    owner: LocalWallet,
    address: Address,
    factory: Address,
}

impl CoinbaseSmartAccount {
    pub fn new(owner: LocalWallet, address: Address, factory: Address) -> Self {
        Self {
            owner,
            address,
            factory,
        }
    }

    pub fn owner(&self) -> Address {
        self.owner.address()
    }
}

impl SmartAccount for CoinbaseSmartAccount {
    fn address(&self) -> Address {
        self.address
    }

    fn init_code(&self) -> Bytes {
        let mut code = self.factory.as_bytes().to_vec();
        code.extend_from_slice(&factory_calldata(
            CREATE_ACCOUNT_SIGNATURE,
            self.owner.address(),
        ));
        Bytes::from(code)
    }

    fn encode_calls(&self, calls: &[CallDescriptor]) -> Bytes {
        let call_token = |call: &CallDescriptor| {
            vec![
                Token::Address(call.to),
                Token::Uint(call.value),
                Token::Bytes(call.data.to_vec()),
            ]
        };

        let (signature, args) = match calls {
            [single] => (EXECUTE_SIGNATURE, call_token(single)),
            many => (
                EXECUTE_BATCH_SIGNATURE,
                vec![Token::Array(
                    many.iter().map(|c| Token::Tuple(call_token(c))).collect(),
                )],
            ),
        };

        let mut data = id(signature).to_vec();
        data.extend_from_slice(&abi::encode(&args));
        Bytes::from(data)
    }

    fn stub_signature(&self) -> Bytes {
        let mut placeholder = vec![0xffu8; 32];
        placeholder.extend_from_slice(&[0x7a; 32]);
        placeholder.push(0x1c);
        wrap_signature(placeholder)
    }

    fn sign_user_op_hash(&self, hash: H256) -> Result<Bytes, RelayError> {
        let signature = self
            .owner
            .sign_hash(hash)
            .map_err(|e| RelayError::Account(format!("signing failed: {e}")))?;
        Ok(wrap_signature(signature.to_vec()))
    }
}

/// `abi.encode(SignatureWrapper(ownerIndex = 0, signatureData))`.
fn wrap_signature(signature: Vec<u8>) -> Bytes {
    Bytes::from(abi::encode(&[Token::Tuple(vec![
        Token::Uint(U256::zero()),
        Token::Bytes(signature),
    ])]))
}

fn factory_calldata(signature: &str, owner: Address) -> Vec<u8> {
    let owners = Token::Array(vec![Token::Bytes(abi::encode(&[Token::Address(owner)]))]);
    let mut data = id(signature).to_vec();
    data.extend_from_slice(&abi::encode(&[owners, Token::Uint(U256::zero())]));
    data
}

/// Generates a fresh owner key per call and resolves the counterfactual
/// account address through the factory.
pub struct EphemeralAccountFactory {
    provider: Provider<Http>,
    factory: Address,
}

impl EphemeralAccountFactory {
    pub fn new(rpc_url: &str, factory: Address) -> Result<Self, RelayError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| RelayError::Config(format!("invalid RPC URL: {e}")))?;
        Ok(Self { provider, factory })
    }
}

#[async_trait]
impl AccountFactory for EphemeralAccountFactory {
    async fn create(&self) -> Result<Box<dyn SmartAccount>, RelayError> {
        let owner = LocalWallet::new(&mut rand::thread_rng());

        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.factory)
            .data(Bytes::from(factory_calldata(
                GET_ADDRESS_SIGNATURE,
                owner.address(),
            )))
            .into();
        let output = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| RelayError::Account(format!("factory getAddress failed: {e}")))?;

        let address = match abi::decode(&[ParamType::Address], &output)
            .map_err(|e| RelayError::Account(format!("factory returned bad address: {e}")))?
            .pop()
        {
            Some(Token::Address(address)) => address,
            other => {
                return Err(RelayError::Account(format!(
                    "factory returned unexpected value: {other:?}"
                )))
            }
        };

        debug!(account = ?address, "derived ephemeral smart account");
        Ok(Box::new(CoinbaseSmartAccount::new(owner, address, self.factory)))
    }
}
