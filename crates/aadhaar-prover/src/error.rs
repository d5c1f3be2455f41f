//! Error types for QR decoding, witness building and proving

use thiserror::Error;

/// Result type alias for prover operations
pub type Result<T> = std::result::Result<T, ProverError>;

/// Errors that can occur between a scanned QR payload and a verified proof
#[derive(Error, Debug)]
pub enum ProverError {
    /// Compressed payload is corrupt, truncated or not a decimal numeral
    #[error("Corrupt QR payload: {reason}")]
    Codec { reason: String },

    /// Decompressed payload violates the delimiter layout
    #[error("Malformed QR data at byte {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// Value does not fit the configured word budget
    #[error(
        "Value of {bits} bits does not fit {word_count} words of {word_bits} bits ({budget} bits)"
    )]
    Overflow {
        bits: u64,
        budget: u64,
        word_bits: usize,
        word_count: usize,
    },

    /// Signature, key or proof verification failure
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// A witness field is missing or has the wrong size
    #[error("Incomplete witness: {field} has {actual} elements (expected {expected})")]
    IncompleteWitness {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// Network or filesystem failure while obtaining an artifact
    #[error("Failed to fetch artifact {location}: {reason}")]
    ArtifactFetch { location: String, reason: String },

    /// Artifact server refused the request with a client error status
    #[error("Artifact {location} was refused with HTTP {status}")]
    ArtifactRejected { location: String, status: u16 },

    /// Proving engine rejected the witness or its artifacts
    #[error("Proof generation failed: {reason}")]
    Proving { reason: String },

    /// Another proof is already running on this orchestrator
    #[error("A proof is already in progress")]
    Busy,

    /// Invalid input value
    #[error("Invalid input: {field} = {value} (expected {expected})")]
    InvalidInput {
        field: String,
        value: String,
        expected: String,
    },

    /// Invalid proof format
    #[error("Invalid proof format: {reason}")]
    InvalidProofFormat { reason: String },

    /// Configuration could not be loaded or is incomplete
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arkworks error
    #[error("Cryptographic error: {0}")]
    ArkError(String),
}

/// Reasons a signature, signer key or proof is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// Certificate, key or signature could not be decoded
    #[error("Malformed key material: {reason}")]
    Malformed { reason: String },

    /// Signature is well formed but does not match the signed data
    #[error("QR signature does not match any trusted key")]
    InvalidSignature,

    /// Proof is bound to a different signer key than the trusted one
    #[error("Public key hash mismatch: expected {expected}, proof carries {actual}")]
    KeyMismatch { expected: String, actual: String },

    /// Verification key and public signals disagree in shape
    #[error("Proof rejected: {reason}")]
    ProofRejected { reason: String },
}

impl ProverError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Verification(VerificationError::Malformed {
            reason: reason.into(),
        })
    }

    pub(crate) fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn fetch(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::ArtifactFetch {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a retry of the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ArtifactFetch { .. } | Self::Busy)
    }
}

impl From<ark_serialize::SerializationError> for ProverError {
    fn from(e: ark_serialize::SerializationError) -> Self {
        Self::ArkError(e.to_string())
    }
}

impl From<ark_relations::r1cs::SynthesisError> for ProverError {
    fn from(e: ark_relations::r1cs::SynthesisError) -> Self {
        Self::ArkError(e.to_string())
    }
}

impl From<toml::de::Error> for ProverError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config {
            reason: e.to_string(),
        }
    }
}

impl From<toml::ser::Error> for ProverError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Config {
            reason: e.to_string(),
        }
    }
}
