//! Proving engines: Groth16 proof generation and verification

use std::path::Path;
use std::time::Instant;

use ark_bn254::Bn254;
use ark_groth16::{Groth16, ProvingKey, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ark_std::rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::artifacts::{ArtifactLocation, ArtifactLocations, ProverArtifacts};
use crate::circuit::{ClaimCircuit, ClaimOutputs};
use crate::claim::{PublicSignal, PublicSignals};
use crate::config::CircuitConfig;
use crate::error::{ProverError, Result, VerificationError};
use crate::proof::{g1_from_strings, g1_to_strings, g2_from_strings, g2_to_strings};
use crate::proof::{Proof, ProofResult};
use crate::witness::Witness;

/// Name recorded in manifests of the claim circuit
pub const CLAIM_CIRCUIT: &str = "aadhaar_claim";

/// File names written by [`DevelopmentKeys::write_to`]
pub const CIRCUIT_FILE: &str = "circuit.json";
pub const PROVING_KEY_FILE: &str = "proving_key.bin";
pub const VERIFICATION_KEY_FILE: &str = "verification_key.json";

/// External proving engine contract
pub trait ProvingEngine: Send + Sync {
    /// Compute the witness, prove it and return proof plus public signals
    fn full_prove(&self, artifacts: &ProverArtifacts, witness: &Witness) -> Result<ProofResult>;

    /// Check a proof against a verification key artifact
    fn verify(
        &self,
        verification_key: &[u8],
        public_signals: &PublicSignals,
        proof: &Proof,
    ) -> Result<bool>;
}

/// Circuit artifact of the native engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitManifest {
    /// Circuit identifier
    pub name: String,
    /// Number of public signals
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    /// Constants the witness must match
    pub circuit: CircuitConfig,
}

impl CircuitManifest {
    /// Manifest of the claim circuit for a configuration
    pub fn new(circuit: CircuitConfig) -> Self {
        Self {
            name: CLAIM_CIRCUIT.into(),
            n_public: PublicSignal::COUNT,
            circuit,
        }
    }

    /// Parse a manifest artifact
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProverError::Proving {
            reason: format!("circuit artifact is not a claim manifest: {e}"),
        })
    }

    fn check(&self, witness: &Witness) -> Result<()> {
        if self.name != CLAIM_CIRCUIT || self.n_public != PublicSignal::COUNT {
            return Err(ProverError::Proving {
                reason: format!(
                    "unsupported circuit {} with {} public signals",
                    self.name, self.n_public
                ),
            });
        }
        if self.circuit != witness.config {
            return Err(ProverError::Proving {
                reason: "witness was built for different circuit constants".into(),
            });
        }
        Ok(())
    }
}

/// Groth16 over BN254 with the native claim circuit.
///
/// A development engine: its proofs bind the signer key hash, the nullifiers
/// and the reveal gating, but not the RSA signature or the attribute values,
/// which are computed outside the circuit. It is not sound against a prover
/// holding the proving key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Groth16Engine;

impl Groth16Engine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Generate development keys. Not a trusted setup.
    #[instrument(skip(rng))]
    pub fn setup<R: RngCore + CryptoRng>(
        config: CircuitConfig,
        rng: &mut R,
    ) -> Result<DevelopmentKeys> {
        config.validate()?;
        let start = Instant::now();

        let blank = ClaimCircuit::blank(&config)?;
        let (pk, vk) = Groth16::<Bn254>::circuit_specific_setup(blank, rng).map_err(|e| {
            ProverError::Proving {
                reason: format!("setup failed: {e}"),
            }
        })?;

        let mut proving_key = Vec::new();
        pk.serialize_compressed(&mut proving_key)?;

        info!("Generated development keys in {:?}", start.elapsed());

        Ok(DevelopmentKeys {
            circuit: serde_json::to_vec_pretty(&CircuitManifest::new(config))?,
            proving_key,
            verification_key: serde_json::to_vec_pretty(&VerificationKeyJson::from_vk(&vk))?,
        })
    }

    fn load_proving_key(bytes: &[u8]) -> Result<ProvingKey<Bn254>> {
        ProvingKey::deserialize_compressed(bytes).map_err(|e| ProverError::Proving {
            reason: format!("invalid proving key: {e}"),
        })
    }
}

impl ProvingEngine for Groth16Engine {
    #[instrument(skip_all)]
    fn full_prove(&self, artifacts: &ProverArtifacts, witness: &Witness) -> Result<ProofResult> {
        let start = Instant::now();

        CircuitManifest::from_bytes(&artifacts.circuit)?.check(witness)?;
        let outputs = ClaimOutputs::compute(witness)?;
        let public_signals = outputs.public_signals(&witness.reveal);

        let witness_time = start.elapsed();
        debug!("Witness computed in {:?}", witness_time);

        let pk = Self::load_proving_key(&artifacts.proving_key)?;
        let circuit = ClaimCircuit::new(outputs, witness.reveal);

        let prove_start = Instant::now();
        let mut rng = rand::thread_rng();
        let proof = Groth16::<Bn254>::prove(&pk, circuit, &mut rng).map_err(|e| {
            ProverError::Proving {
                reason: e.to_string(),
            }
        })?;

        info!(
            "Proof generated - witness: {:?}, prove: {:?}, total: {:?}",
            witness_time,
            prove_start.elapsed(),
            start.elapsed()
        );

        Ok(ProofResult::new(Proof::new(proof), public_signals))
    }

    #[instrument(skip_all)]
    fn verify(
        &self,
        verification_key: &[u8],
        public_signals: &PublicSignals,
        proof: &Proof,
    ) -> Result<bool> {
        let vk_json: VerificationKeyJson = serde_json::from_slice(verification_key)?;
        let vk = vk_json.to_vk()?;

        let inputs = public_signals.to_field_elements();
        if vk.gamma_abc_g1.len() != inputs.len() + 1 {
            return Err(VerificationError::ProofRejected {
                reason: format!(
                    "verification key expects {} public signals, got {}",
                    vk.gamma_abc_g1.len().saturating_sub(1),
                    inputs.len()
                ),
            }
            .into());
        }

        let is_valid = Groth16::<Bn254>::verify(&vk, &inputs, &proof.inner).map_err(|e| {
            VerificationError::ProofRejected {
                reason: e.to_string(),
            }
        })?;

        info!("Proof verification result: {}", is_valid);
        Ok(is_valid)
    }
}

/// Artifacts produced by [`Groth16Engine::setup`]
#[derive(Clone)]
pub struct DevelopmentKeys {
    /// [`CircuitManifest`] JSON
    pub circuit: Vec<u8>,
    /// Compressed arkworks proving key
    pub proving_key: Vec<u8>,
    /// snarkjs verification key JSON
    pub verification_key: Vec<u8>,
}

impl DevelopmentKeys {
    /// Write the three artifacts into `dir` and return their locations
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<ArtifactLocations> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let circuit = dir.join(CIRCUIT_FILE);
        let proving_key = dir.join(PROVING_KEY_FILE);
        let verification_key = dir.join(VERIFICATION_KEY_FILE);
        std::fs::write(&circuit, &self.circuit)?;
        std::fs::write(&proving_key, &self.proving_key)?;
        std::fs::write(&verification_key, &self.verification_key)?;

        debug!("Wrote development keys to {}", dir.display());
        Ok(ArtifactLocations {
            circuit: ArtifactLocation::Local { path: circuit },
            proving_key: ArtifactLocation::Local { path: proving_key },
            verification_key: ArtifactLocation::Local {
                path: verification_key,
            },
        })
    }

    /// Artifacts ready for proving
    pub fn prover_artifacts(&self) -> ProverArtifacts {
        ProverArtifacts {
            circuit: self.circuit.clone(),
            proving_key: self.proving_key.clone(),
        }
    }
}

/// snarkjs verification key JSON format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKeyJson {
    pub protocol: String,
    pub curve: String,
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    pub vk_alpha_1: Vec<String>,
    pub vk_beta_2: Vec<Vec<String>>,
    pub vk_gamma_2: Vec<Vec<String>>,
    pub vk_delta_2: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vk_alphabeta_12: Option<serde_json::Value>,
    #[serde(rename = "IC")]
    pub ic: Vec<Vec<String>>,
}

impl VerificationKeyJson {
    /// Render an arkworks verifying key
    pub fn from_vk(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            protocol: "groth16".into(),
            curve: "bn128".into(),
            n_public: vk.gamma_abc_g1.len().saturating_sub(1),
            vk_alpha_1: g1_to_strings(&vk.alpha_g1),
            vk_beta_2: g2_to_strings(&vk.beta_g2),
            vk_gamma_2: g2_to_strings(&vk.gamma_g2),
            vk_delta_2: g2_to_strings(&vk.delta_g2),
            vk_alphabeta_12: None,
            ic: vk.gamma_abc_g1.iter().map(g1_to_strings).collect(),
        }
    }

    /// Parse into an arkworks verifying key
    pub fn to_vk(&self) -> Result<VerifyingKey<Bn254>> {
        if self.protocol != "groth16" || !matches!(self.curve.as_str(), "bn128" | "bn254") {
            return Err(VerificationError::Malformed {
                reason: format!(
                    "unsupported verification key {}/{}",
                    self.protocol, self.curve
                ),
            }
            .into());
        }
        if self.ic.len() != self.n_public + 1 {
            return Err(VerificationError::Malformed {
                reason: format!(
                    "IC has {} points for {} public signals",
                    self.ic.len(),
                    self.n_public
                ),
            }
            .into());
        }

        Ok(VerifyingKey {
            alpha_g1: g1_from_strings(&self.vk_alpha_1)?,
            beta_g2: g2_from_strings(&self.vk_beta_2)?,
            gamma_g2: g2_from_strings(&self.vk_gamma_2)?,
            delta_g2: g2_from_strings(&self.vk_delta_2)?,
            gamma_abc_g1: self
                .ic
                .iter()
                .map(|p| g1_from_strings(p))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}
