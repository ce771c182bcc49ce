//! Vault call construction.
//!
//! Each call is the formatted proof followed by caller-supplied identifiers,
//! ABI-encoded against the vault's function signatures. Proof semantics are
//! not checked here; the vault contract is the authority on that.

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use zkvault_common::{format, FieldElement, FormattedProof, ProofError, ProofObject};

pub const REGISTER_SIGNATURE: &str =
    "register(uint256[2],uint256[2][2],uint256[2],uint256,uint256,uint256,uint256)";
pub const PAY_SIGNATURE: &str =
    "pay(uint256[2],uint256[2][2],uint256[2],uint256,uint256,uint256,uint256,uint256,uint256)";
pub const WITHDRAW_SIGNATURE: &str =
    "withdraw(uint256[2],uint256[2][2],uint256[2],uint256,address,uint256,uint256,uint256,uint256)";

/// Destination and calldata of one call executed by the smart account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallDescriptor {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultCall {
    Register {
        proof: FormattedProof,
        identity_hash: FieldElement,
        credential_hash: FieldElement,
        public_signals: [U256; 2],
    },
    Pay {
        proof: FormattedProof,
        identity_hash: FieldElement,
        recipient_hash: FieldElement,
        credential_hash: FieldElement,
        nonce: FieldElement,
        result_hash: FieldElement,
        amount: U256,
    },
    Withdraw {
        proof: FormattedProof,
        identity_hash: FieldElement,
        recipient: Address,
        credential_hash: FieldElement,
        nonce: FieldElement,
        result_hash: FieldElement,
        amount: U256,
    },
}

impl VaultCall {
    /// Registration uses public signals 2 and 3 of the registration circuit.
    pub fn register(proof: &ProofObject) -> Result<Self, ProofError> {
        Ok(Self::Register {
            proof: format(proof)?,
            identity_hash: proof.input.require_username_hash()?,
            credential_hash: proof.input.require_credential_hash()?,
            public_signals: [proof.public_signal(2)?, proof.public_signal(3)?],
        })
    }

    pub fn pay(
        proof: &ProofObject,
        recipient_hash: FieldElement,
        amount: U256,
    ) -> Result<Self, ProofError> {
        Ok(Self::Pay {
            proof: format(proof)?,
            identity_hash: proof.input.require_username_hash()?,
            recipient_hash,
            credential_hash: proof.input.require_credential_hash()?,
            nonce: proof.input.require_nonce()?,
            result_hash: proof.input.require_result_hash()?,
            amount,
        })
    }

    pub fn withdraw(
        proof: &ProofObject,
        recipient: Address,
        amount: U256,
    ) -> Result<Self, ProofError> {
        Ok(Self::Withdraw {
            proof: format(proof)?,
            identity_hash: proof.input.require_username_hash()?,
            recipient,
            credential_hash: proof.input.require_credential_hash()?,
            nonce: proof.input.require_nonce()?,
            result_hash: proof.input.require_result_hash()?,
            amount,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Pay { .. } => "pay",
            Self::Withdraw { .. } => "withdraw",
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            Self::Register { .. } => REGISTER_SIGNATURE,
            Self::Pay { .. } => PAY_SIGNATURE,
            Self::Withdraw { .. } => WITHDRAW_SIGNATURE,
        }
    }

    /// Selector followed by the ABI-encoded arguments.
    pub fn encode(&self) -> Bytes {
        let mut tokens = proof_tokens(self.proof());
        match self {
            Self::Register {
                identity_hash,
                credential_hash,
                public_signals,
                ..
            } => {
                tokens.push(field_token(identity_hash));
                tokens.push(field_token(credential_hash));
                tokens.push(Token::Uint(public_signals[0]));
                tokens.push(Token::Uint(public_signals[1]));
            }
            Self::Pay {
                identity_hash,
                recipient_hash,
                credential_hash,
                nonce,
                result_hash,
                amount,
                ..
            } => {
                tokens.push(field_token(identity_hash));
                tokens.push(field_token(recipient_hash));
                tokens.push(field_token(credential_hash));
                tokens.push(field_token(nonce));
                tokens.push(field_token(result_hash));
                tokens.push(Token::Uint(*amount));
            }
            Self::Withdraw {
                identity_hash,
                recipient,
                credential_hash,
                nonce,
                result_hash,
                amount,
                ..
            } => {
                tokens.push(field_token(identity_hash));
                tokens.push(Token::Address(*recipient));
                tokens.push(field_token(credential_hash));
                tokens.push(field_token(nonce));
                tokens.push(field_token(result_hash));
                tokens.push(Token::Uint(*amount));
            }
        }

        let mut calldata = id(self.signature()).to_vec();
        calldata.extend_from_slice(&abi::encode(&tokens));
        Bytes::from(calldata)
    }

    pub fn into_call(self, vault: Address) -> CallDescriptor {
        CallDescriptor {
            to: vault,
            value: U256::zero(),
            data: self.encode(),
        }
    }

    fn proof(&self) -> &FormattedProof {
        match self {
            Self::Register { proof, .. } | Self::Pay { proof, .. } | Self::Withdraw { proof, .. } => {
                proof
            }
        }
    }
}

fn field_token(value: &FieldElement) -> Token {
    Token::Uint(value.to_u256())
}

fn pair_token(pair: &[U256; 2]) -> Token {
    Token::FixedArray(vec![Token::Uint(pair[0]), Token::Uint(pair[1])])
}

fn proof_tokens(proof: &FormattedProof) -> Vec<Token> {
    vec![
        pair_token(&proof.pi_a),
        Token::FixedArray(vec![pair_token(&proof.pi_b[0]), pair_token(&proof.pi_b[1])]),
        pair_token(&proof.pi_c),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkvault_common::ProofInput;

    fn sample_proof() -> ProofObject {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        ProofObject {
            pi_a: s(&["1", "2", "1"]),
            pi_b: vec![s(&["3", "4"]), s(&["5", "6"]), s(&["1", "0"])],
            pi_c: s(&["7", "8", "1"]),
            public_signals: s(&["0", "0", "9", "10"]),
            input: ProofInput {
                username_hash: Some(FieldElement::from_u64(100)),
                credential_hash: Some(FieldElement::from_u64(200)),
                nonce: Some(FieldElement::from_u64(300)),
                result_hash: Some(FieldElement::from_u64(400)),
            },
        }
    }

    fn word(data: &[u8], index: usize) -> U256 {
        let start = 4 + index * 32;
        U256::from_big_endian(&data[start..start + 32])
    }

    #[test]
    fn register_layout() {
        let call = VaultCall::register(&sample_proof()).unwrap();
        let data = call.encode();

        assert_eq!(&data[..4], &id(REGISTER_SIGNATURE)[..]);
        assert_eq!(data.len(), 4 + 12 * 32);
        // pi_b arrives swapped from the proof adapter.
        assert_eq!(word(&data, 2), U256::from(4u64));
        assert_eq!(word(&data, 3), U256::from(3u64));
        assert_eq!(word(&data, 8), U256::from(100u64));
        assert_eq!(word(&data, 9), U256::from(200u64));
        assert_eq!(word(&data, 10), U256::from(9u64));
        assert_eq!(word(&data, 11), U256::from(10u64));
    }

    #[test]
    fn pay_layout() {
        let call = VaultCall::pay(&sample_proof(), FieldElement::from_u64(555), U256::from(1_000_000u64))
            .unwrap();
        let data = call.encode();

        assert_eq!(&data[..4], &id(PAY_SIGNATURE)[..]);
        assert_eq!(data.len(), 4 + 14 * 32);
        assert_eq!(word(&data, 8), U256::from(100u64));
        assert_eq!(word(&data, 9), U256::from(555u64));
        assert_eq!(word(&data, 12), U256::from(400u64));
        assert_eq!(word(&data, 13), U256::from(1_000_000u64));
    }

    #[test]
    fn withdraw_places_recipient_address() {
        let recipient: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        let call = VaultCall::withdraw(&sample_proof(), recipient, U256::from(5u64)).unwrap();
        let data = call.encode();

        assert_eq!(&data[..4], &id(WITHDRAW_SIGNATURE)[..]);
        assert_eq!(word(&data, 9), U256::from(0xaau64));
        assert_eq!(call.name(), "withdraw");
    }

    #[test]
    fn missing_inputs_are_malformed() {
        let mut proof = sample_proof();
        proof.input.nonce = None;
        assert!(VaultCall::pay(&proof, FieldElement::from_u64(1), U256::one()).is_err());

        let mut proof = sample_proof();
        proof.public_signals.truncate(3);
        assert!(VaultCall::register(&proof).is_err());
    }

    #[test]
    fn into_call_targets_vault() {
        let vault: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let call = VaultCall::register(&sample_proof()).unwrap().into_call(vault);
        assert_eq!(call.to, vault);
        assert!(call.value.is_zero());
    }
}
