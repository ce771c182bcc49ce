//! Field hashing for usernames and credentials.
//!
//! Identifiers that reach the vault contract are circom Poseidon digests over
//! the BN254 scalar field. The on-chain verifier recomputes the same digests
//! inside the circuit, so the parameters here must match circomlib exactly.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ethers_core::types::U256;
use light_poseidon::{Poseidon, PoseidonHasher};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Largest input width accepted by [`poseidon`].
pub const MAX_ARITY: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("poseidon accepts 1 to {MAX_ARITY} inputs, got {0}")]
    Arity(usize),

    #[error("invalid field element '{0}'")]
    InvalidElement(String),

    #[error("value {0} is not below the field modulus")]
    NotCanonical(String),

    #[error("poseidon error: {0}")]
    Poseidon(String),
}

/// Element of the BN254 scalar field.
///
/// Displays and serializes as its canonical decimal string, which is how the
/// vault contract and the ledger represent identity and credential hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldElement(Fr);

impl FieldElement {
    pub fn from_u64(value: u64) -> Self {
        Self(Fr::from(value))
    }

    /// Reduces an arbitrary integer modulo the field prime.
    pub fn from_biguint_reduced(value: &BigUint) -> Self {
        Self(Fr::from_be_bytes_mod_order(&value.to_bytes_be()))
    }

    /// Rejects values at or above the modulus instead of reducing them.
    pub fn from_biguint(value: &BigUint) -> Result<Self, HashError> {
        if value >= &modulus() {
            return Err(HashError::NotCanonical(value.to_string()));
        }
        Ok(Self::from_biguint_reduced(value))
    }

    pub fn from_u256(value: U256) -> Result<Self, HashError> {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        Self::from_biguint(&BigUint::from_bytes_be(&bytes))
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0.into_bigint().to_bytes_be())
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0.into_bigint().to_bytes_be())
    }

    pub fn inner(&self) -> Fr {
        self.0
    }
}

fn modulus() -> BigUint {
    Fr::MODULUS.into()
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_biguint())
    }
}

impl FromStr for FieldElement {
    type Err = HashError;

    /// Accepts decimal or `0x`-prefixed hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
            None => BigUint::parse_bytes(trimmed.as_bytes(), 10),
        };
        let value = parsed.ok_or_else(|| HashError::InvalidElement(s.to_string()))?;
        Self::from_biguint(&value)
    }
}

impl From<Fr> for FieldElement {
    fn from(value: Fr) -> Self {
        Self(value)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Number(value) => Ok(Self::from_u64(value)),
        }
    }
}

/// Maps a UTF-8 string to an integer by big-endian byte accumulation.
///
/// The result is deliberately left unreduced; reduction happens when the
/// value enters [`poseidon`].
pub fn field_of(value: &str) -> BigUint {
    BigUint::from_bytes_be(value.as_bytes())
}

/// Circom-compatible Poseidon over one or two field elements.
pub fn poseidon(inputs: &[FieldElement]) -> Result<FieldElement, HashError> {
    if inputs.is_empty() || inputs.len() > MAX_ARITY {
        return Err(HashError::Arity(inputs.len()));
    }

    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| HashError::Poseidon(e.to_string()))?;
    let values: Vec<Fr> = inputs.iter().map(FieldElement::inner).collect();
    hasher
        .hash(&values)
        .map(FieldElement)
        .map_err(|e| HashError::Poseidon(e.to_string()))
}

/// Public lookup key for a username.
pub fn identity_hash(username: &str) -> Result<FieldElement, HashError> {
    poseidon(&[FieldElement::from_biguint_reduced(&field_of(username))])
}

/// Secret proven in zero knowledge for a (username, password) pair.
pub fn credential_hash(username: &str, password: &str) -> Result<FieldElement, HashError> {
    poseidon(&[
        FieldElement::from_biguint_reduced(&field_of(username)),
        FieldElement::from_biguint_reduced(&field_of(password)),
    ])
}

/// Binds a credential hash to a per-operation nonce.
pub fn result_hash(
    credential_hash: &FieldElement,
    nonce: &FieldElement,
) -> Result<FieldElement, HashError> {
    poseidon(&[*credential_hash, *nonce])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poseidon_matches_circomlib_vectors() {
        let one = FieldElement::from_u64(1);
        let two = FieldElement::from_u64(2);

        assert_eq!(
            poseidon(&[one]).unwrap().to_string(),
            "18586133768512220936620570745912940619677854269274689475585506675881198879027"
        );
        assert_eq!(
            poseidon(&[one, two]).unwrap().to_string(),
            "7853200120776062878684798364095072458815029376092732009249414926327459813530"
        );
    }

    #[test]
    fn poseidon_rejects_unsupported_arity() {
        let one = FieldElement::from_u64(1);
        assert_eq!(poseidon(&[]), Err(HashError::Arity(0)));
        assert_eq!(poseidon(&[one, one, one]), Err(HashError::Arity(3)));
    }

    #[test]
    fn field_of_accumulates_big_endian() {
        assert_eq!(field_of(""), BigUint::from(0u8));
        assert_eq!(field_of("a"), BigUint::from(0x61u8));
        assert_eq!(field_of("ab"), BigUint::from(0x6162u32));
    }

    #[test]
    fn identity_hash_is_deterministic() {
        let first = identity_hash("alice").unwrap();
        let second = identity_hash("alice").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, identity_hash("bob").unwrap());
    }

    #[test]
    fn identity_hash_equals_poseidon_of_field() {
        let expected = poseidon(&[FieldElement::from_u64(0x616c696365)]).unwrap();
        assert_eq!(identity_hash("alice").unwrap(), expected);
    }

    #[test]
    fn credential_hash_depends_on_password_only_through_credential() {
        let identity = identity_hash("alice").unwrap();
        let first = credential_hash("alice", "hunter2").unwrap();
        let second = credential_hash("alice", "correct horse").unwrap();

        assert_ne!(first, identity);
        assert_ne!(second, identity);
        assert_ne!(first, second);
        assert_eq!(identity_hash("alice").unwrap(), identity);
    }

    #[test]
    fn long_usernames_are_reduced_inside_the_hash() {
        let long = "a".repeat(64);
        assert!(field_of(&long) > modulus());
        assert!(identity_hash(&long).is_ok());
    }

    #[test]
    fn parse_accepts_decimal_and_hex() {
        let dec: FieldElement = "255".parse().unwrap();
        let hex: FieldElement = "0xff".parse().unwrap();
        assert_eq!(dec, hex);
        assert_eq!(dec.to_u256(), U256::from(255u64));
    }

    #[test]
    fn parse_rejects_non_canonical_values() {
        let modulus = modulus().to_string();
        assert!(matches!(
            modulus.parse::<FieldElement>(),
            Err(HashError::NotCanonical(_))
        ));
        assert!(matches!(
            "12abc".parse::<FieldElement>(),
            Err(HashError::InvalidElement(_))
        ));
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let element = FieldElement::from_u64(42);
        assert_eq!(serde_json::to_string(&element).unwrap(), "\"42\"");
        let back: FieldElement = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(back, element);
        let numeric: FieldElement = serde_json::from_str("42").unwrap();
        assert_eq!(numeric, element);
    }
}
