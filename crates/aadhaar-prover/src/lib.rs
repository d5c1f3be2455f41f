//! # Aadhaar QR Prover
//!
//! Decodes the signed secure QR printed on Aadhaar documents, turns it into
//! a witness for the claim circuit and drives Groth16 proof generation and
//! verification over BN254.
//!
//! ## Pipeline
//!
//! - **Codec**: decimal numeral → big-endian bytes → inflated payload
//! - **Fields**: delimiter layout, timestamp, date of birth, photo
//! - **Certificate**: RSA PKCS#1 v1.5 signature check against trusted keys
//! - **Witness**: padded data, delimiter positions, word-split key and signature
//! - **Orchestrator**: artifact fetch with caching, proving, verification
//!
//! Only attributes whose reveal flag is set ever leave the proof; everything
//! else is zero in the public signals.
//!
//! ## Example
//!
//! ```rust,ignore
//! use aadhaar_prover::{Groth16Engine, OrchestratorConfig, ProofOrchestrator, RevealFlags};
//!
//! let config = OrchestratorConfig::load("prover.toml")?;
//! let orchestrator = ProofOrchestrator::from_config(&config, Arc::new(Groth16Engine::new()))?;
//!
//! let keys = [PublicKeyMaterial::from_pem(&certificate)?];
//! let witness = orchestrator.build_witness(&qr, &keys, b"1", &seed, RevealFlags::all())?;
//! let result = orchestrator.prove(witness).await?;
//! assert!(orchestrator.verify_result(&result, None).await?);
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod artifacts;
pub mod certificate;
pub mod circuit;
pub mod claim;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fields;
pub mod hashing;
pub mod orchestrator;
pub mod proof;
pub mod witness;
pub mod words;

// Re-exports
pub use artifacts::{ArtifactFetcher, ArtifactLocation, ArtifactLocations, ProverArtifacts};
pub use certificate::{HashAlgorithm, PublicKeyMaterial};
pub use claim::{project_claim, Claim, PublicSignal, PublicSignals};
pub use config::{CircuitConfig, OrchestratorConfig, RetryPolicy};
pub use engine::{Groth16Engine, ProvingEngine};
pub use error::{ProverError, Result, VerificationError};
pub use fields::{Field, FieldTable, QrLayout};
pub use orchestrator::{ProofOrchestrator, ProverState};
pub use proof::{serialize_claim, Proof, ProofResult, SerializedClaim};
pub use witness::{RevealFlags, Witness, WitnessBuilder};
pub use words::WordArray;
