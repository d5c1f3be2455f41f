//! Proof types and serialization

use ark_bn254::{Bn254, Fq, Fq2, G1Affine, G2Affine};
use ark_ec::short_weierstrass::{Affine, SWCurveConfig};
use ark_ec::AffineRepr;
use ark_ff::{BigInteger, PrimeField};
use ark_groth16::Proof as Groth16Proof;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::claim::{Claim, PublicSignals};
use crate::error::{ProverError, Result};

/// A Groth16 proof for the BN254 curve
#[derive(Clone, Debug, PartialEq)]
pub struct Proof {
    /// The underlying arkworks proof
    pub inner: Groth16Proof<Bn254>,
}

impl Proof {
    /// Create from arkworks proof
    pub fn new(inner: Groth16Proof<Bn254>) -> Self {
        Self { inner }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.inner.serialize_compressed(&mut bytes)?;
        Ok(bytes)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = Groth16Proof::deserialize_compressed(bytes)?;
        Ok(Self { inner })
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }

    /// Convert from hex string
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ProverError::InvalidProofFormat { reason: e.to_string() })?;
        Self::from_bytes(&bytes)
    }

    /// snarkjs proof JSON
    pub fn to_json(&self) -> ProofJson {
        ProofJson {
            pi_a: g1_to_strings(&self.inner.a),
            pi_b: g2_to_strings(&self.inner.b),
            pi_c: g1_to_strings(&self.inner.c),
            protocol: "groth16".into(),
            curve: "bn128".into(),
        }
    }

    /// Parse snarkjs proof JSON; points must be on the curve and in the subgroup
    pub fn from_json(json: &ProofJson) -> Result<Self> {
        if json.protocol != "groth16" {
            return Err(ProverError::InvalidProofFormat {
                reason: format!("unsupported protocol {}", json.protocol),
            });
        }
        Ok(Self::new(Groth16Proof {
            a: g1_from_strings(&json.pi_a)?,
            b: g2_from_strings(&json.pi_b)?,
            c: g1_from_strings(&json.pi_c)?,
        }))
    }
}

/// Proof with its public signals
#[derive(Clone, Debug, PartialEq)]
pub struct ProofResult {
    /// The Groth16 proof
    pub proof: Proof,
    /// Ordered public signals
    pub public_signals: PublicSignals,
}

impl ProofResult {
    /// Pair a proof with its signals
    pub fn new(proof: Proof, public_signals: PublicSignals) -> Self {
        Self {
            proof,
            public_signals,
        }
    }
}

/// JSON-serializable proof format (compatible with snarkjs)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofJson {
    /// Proof point A (G1)
    pub pi_a: Vec<String>,
    /// Proof point B (G2)
    pub pi_b: Vec<Vec<String>>,
    /// Proof point C (G1)
    pub pi_c: Vec<String>,
    /// Protocol identifier
    pub protocol: String,
    /// Curve identifier
    pub curve: String,
}

/// Claim plus proof, as persisted by a login flow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedClaim {
    /// Revealed attributes
    pub claim: Claim,
    /// snarkjs proof
    pub proof: ProofJson,
    /// Public signals as decimal strings
    pub public_signals: PublicSignals,
}

impl SerializedClaim {
    /// Parse the JSON produced by [`serialize_claim`]
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Recover the proof and its signals
    pub fn to_proof_result(&self) -> Result<ProofResult> {
        Ok(ProofResult::new(
            Proof::from_json(&self.proof)?,
            self.public_signals.clone(),
        ))
    }
}

/// Stable-order JSON of a claim and its proof; big integers are decimal strings
pub fn serialize_claim(claim: &Claim, result: &ProofResult) -> Result<String> {
    let serialized = SerializedClaim {
        claim: claim.clone(),
        proof: result.proof.to_json(),
        public_signals: result.public_signals.clone(),
    };
    Ok(serde_json::to_string(&serialized)?)
}

pub(crate) fn fq_to_string(f: &Fq) -> String {
    BigUint::from_bytes_le(&f.into_bigint().to_bytes_le()).to_string()
}

fn fq_from_string(s: &str) -> Result<Fq> {
    let value = BigUint::parse_bytes(s.as_bytes(), 10).ok_or_else(|| {
        ProverError::InvalidProofFormat {
            reason: format!("coordinate {s:?} is not a decimal integer"),
        }
    })?;
    let modulus: BigUint = Fq::MODULUS.into();
    if value >= modulus {
        return Err(ProverError::InvalidProofFormat {
            reason: "coordinate exceeds the base field modulus".into(),
        });
    }
    Ok(Fq::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// `[x, y, "1"]`, or `["0", "1", "0"]` for the identity
pub(crate) fn g1_to_strings(point: &G1Affine) -> Vec<String> {
    if point.is_zero() {
        return vec!["0".into(), "1".into(), "0".into()];
    }
    vec![fq_to_string(&point.x), fq_to_string(&point.y), "1".into()]
}

/// `[[x.c0, x.c1], [y.c0, y.c1], ["1", "0"]]`
pub(crate) fn g2_to_strings(point: &G2Affine) -> Vec<Vec<String>> {
    if point.is_zero() {
        return vec![
            vec!["0".into(), "0".into()],
            vec!["1".into(), "0".into()],
            vec!["0".into(), "0".into()],
        ];
    }
    vec![
        vec![fq_to_string(&point.x.c0), fq_to_string(&point.x.c1)],
        vec![fq_to_string(&point.y.c0), fq_to_string(&point.y.c1)],
        vec!["1".into(), "0".into()],
    ]
}

pub(crate) fn g1_from_strings(coords: &[String]) -> Result<G1Affine> {
    let [x, y, z] = coords else {
        return Err(ProverError::InvalidProofFormat {
            reason: format!("G1 point needs 3 coordinates, got {}", coords.len()),
        });
    };
    if z == "0" {
        return Ok(G1Affine::zero());
    }
    check_point(G1Affine::new_unchecked(fq_from_string(x)?, fq_from_string(y)?))
}

pub(crate) fn g2_from_strings(coords: &[Vec<String>]) -> Result<G2Affine> {
    let fq2 = |pair: &Vec<String>| -> Result<Fq2> {
        match pair.as_slice() {
            [c0, c1] => Ok(Fq2::new(fq_from_string(c0)?, fq_from_string(c1)?)),
            _ => Err(ProverError::InvalidProofFormat {
                reason: format!("Fq2 element needs 2 limbs, got {}", pair.len()),
            }),
        }
    };
    let [x, y, z] = coords else {
        return Err(ProverError::InvalidProofFormat {
            reason: format!("G2 point needs 3 coordinates, got {}", coords.len()),
        });
    };
    if z.first().is_some_and(|c| c == "0") && z.get(1).is_some_and(|c| c == "0") {
        return Ok(G2Affine::zero());
    }
    check_point(G2Affine::new_unchecked(fq2(x)?, fq2(y)?))
}

fn check_point<P: SWCurveConfig>(point: Affine<P>) -> Result<Affine<P>> {
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProverError::InvalidProofFormat {
            reason: "point is not in the prime-order subgroup".into(),
        });
    }
    Ok(point)
}
