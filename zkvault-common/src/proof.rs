//! Groth16 proof objects as produced by the external prover, and their
//! reformatting into the layout the on-chain verifier expects.

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hasher::FieldElement;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("malformed proof: {0}")]
    Malformed(String),
}

fn malformed(message: impl Into<String>) -> ProofError {
    ProofError::Malformed(message.into())
}

/// Named circuit inputs carried alongside the proof.
///
/// Every field is optional at the boundary; handlers ask for the ones their
/// call needs through the `require_*` accessors.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProofInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_hash: Option<FieldElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_hash: Option<FieldElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<FieldElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<FieldElement>,
}

impl ProofInput {
    pub fn require_username_hash(&self) -> Result<FieldElement, ProofError> {
        self.username_hash
            .ok_or_else(|| malformed("missing input.username_hash"))
    }

    pub fn require_credential_hash(&self) -> Result<FieldElement, ProofError> {
        self.credential_hash
            .ok_or_else(|| malformed("missing input.credential_hash"))
    }

    pub fn require_nonce(&self) -> Result<FieldElement, ProofError> {
        self.nonce.ok_or_else(|| malformed("missing input.nonce"))
    }

    pub fn require_result_hash(&self) -> Result<FieldElement, ProofError> {
        self.result_hash
            .ok_or_else(|| malformed("missing input.result_hash"))
    }
}

/// Proof as emitted by snarkjs, plus public signals and named inputs.
///
/// Coordinates are base-field integers written as decimal strings; `pi_a` and
/// `pi_c` usually carry a trailing projective `"1"` and `pi_b` a trailing
/// `["1", "0"]` pair.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProofObject {
    #[serde(default)]
    pub pi_a: Vec<String>,
    #[serde(default)]
    pub pi_b: Vec<Vec<String>>,
    #[serde(default)]
    pub pi_c: Vec<String>,
    #[serde(rename = "publicSignals", default)]
    pub public_signals: Vec<String>,
    #[serde(default)]
    pub input: ProofInput,
}

impl ProofObject {
    pub fn public_signal(&self, index: usize) -> Result<U256, ProofError> {
        let raw = self
            .public_signals
            .get(index)
            .ok_or_else(|| malformed(format!("missing publicSignals[{index}]")))?;
        parse_uint(raw, &format!("publicSignals[{index}]"))
    }
}

/// Proof points in the order and coordinate convention of the Solidity
/// Groth16 verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormattedProof {
    pub pi_a: [U256; 2],
    pub pi_b: [[U256; 2]; 2],
    pub pi_c: [U256; 2],
}

/// Reformats a prover proof for the on-chain verifier.
///
/// `pi_a` and `pi_c` keep their first two coordinates. Each `pi_b` pair is
/// swapped because the pairing precompile takes Fq2 elements as
/// (imaginary, real) while snarkjs writes (real, imaginary). A wrong order is
/// not detectable here; the verifier just rejects the proof.
pub fn format(proof: &ProofObject) -> Result<FormattedProof, ProofError> {
    let pi_a = affine_point(&proof.pi_a, "pi_a")?;
    let pi_c = affine_point(&proof.pi_c, "pi_c")?;

    if proof.pi_b.len() < 2 {
        return Err(malformed(format!(
            "pi_b needs 2 coordinate pairs, got {}",
            proof.pi_b.len()
        )));
    }
    let mut pi_b = [[U256::zero(); 2]; 2];
    for (i, pair) in proof.pi_b.iter().take(2).enumerate() {
        let label = format!("pi_b[{i}]");
        if pair.len() < 2 {
            return Err(malformed(format!(
                "{label} needs 2 coordinates, got {}",
                pair.len()
            )));
        }
        pi_b[i] = [
            parse_uint(&pair[1], &format!("{label}[1]"))?,
            parse_uint(&pair[0], &format!("{label}[0]"))?,
        ];
    }

    Ok(FormattedProof { pi_a, pi_b, pi_c })
}

fn affine_point(coords: &[String], label: &str) -> Result<[U256; 2], ProofError> {
    if coords.len() < 2 {
        return Err(malformed(format!(
            "{label} needs 2 coordinates, got {}",
            coords.len()
        )));
    }
    Ok([
        parse_uint(&coords[0], &format!("{label}[0]"))?,
        parse_uint(&coords[1], &format!("{label}[1]"))?,
    ])
}

fn parse_uint(raw: &str, label: &str) -> Result<U256, ProofError> {
    let trimmed = raw.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_dec_str(trimmed).ok(),
    };
    parsed.ok_or_else(|| malformed(format!("{label} is not an unsigned integer: '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn sample_proof() -> ProofObject {
        ProofObject {
            pi_a: strings(&["11", "12", "1"]),
            pi_b: vec![
                strings(&["21", "22"]),
                strings(&["23", "24"]),
                strings(&["1", "0"]),
            ],
            pi_c: strings(&["31", "32", "1"]),
            public_signals: strings(&["1", "2", "3", "4"]),
            input: ProofInput::default(),
        }
    }

    #[test]
    fn swaps_each_pi_b_pair() {
        let formatted = format(&sample_proof()).unwrap();
        assert_eq!(
            formatted.pi_b,
            [
                [U256::from(22u64), U256::from(21u64)],
                [U256::from(24u64), U256::from(23u64)],
            ]
        );
    }

    #[test]
    fn drops_projective_coordinate() {
        let formatted = format(&sample_proof()).unwrap();
        assert_eq!(formatted.pi_a, [U256::from(11u64), U256::from(12u64)]);
        assert_eq!(formatted.pi_c, [U256::from(31u64), U256::from(32u64)]);
    }

    #[test]
    fn accepts_exactly_two_coordinates() {
        let mut proof = sample_proof();
        proof.pi_a.truncate(2);
        proof.pi_c.truncate(2);
        proof.pi_b.truncate(2);
        assert!(format(&proof).is_ok());
    }

    #[test]
    fn rejects_short_arrays() {
        let mut proof = sample_proof();
        proof.pi_a.truncate(1);
        assert!(matches!(format(&proof), Err(ProofError::Malformed(m)) if m.contains("pi_a")));

        let mut proof = sample_proof();
        proof.pi_b.truncate(1);
        assert!(matches!(format(&proof), Err(ProofError::Malformed(m)) if m.contains("pi_b")));

        let mut proof = sample_proof();
        proof.pi_b[1].truncate(1);
        assert!(matches!(format(&proof), Err(ProofError::Malformed(m)) if m.contains("pi_b[1]")));
    }

    #[test]
    fn rejects_non_numeric_coordinates() {
        let mut proof = sample_proof();
        proof.pi_c[0] = "not-a-number".into();
        assert!(format(&proof).is_err());
    }

    #[test]
    fn deserializes_snarkjs_shape() {
        let json = serde_json::json!({
            "pi_a": ["1", "2", "1"],
            "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
            "pi_c": ["7", "8", "1"],
            "protocol": "groth16",
            "curve": "bn128",
            "publicSignals": ["9", "10", "11", "12"],
            "input": {
                "username_hash": "100",
                "credential_hash": "200"
            }
        });
        let proof: ProofObject = serde_json::from_value(json).unwrap();
        assert_eq!(proof.public_signal(3).unwrap(), U256::from(12u64));
        assert_eq!(
            proof.input.require_username_hash().unwrap(),
            FieldElement::from_u64(100)
        );
        assert!(proof.input.require_nonce().is_err());
        assert!(proof.public_signal(4).is_err());
    }
}
