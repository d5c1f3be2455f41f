//! Circuit constants and orchestrator configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifacts::ArtifactLocations;
use crate::certificate::HashAlgorithm;
use crate::error::{ProverError, Result};
use crate::fields::QrLayout;

/// Circuit-specific constants, selected once per orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Bits per signature/modulus word
    pub word_bits: usize,
    /// Words per signature/modulus
    pub word_count: usize,
    /// Padded message budget in bytes (multiple of 64)
    pub max_data_length: usize,
    /// Payload layout
    pub layout: QrLayout,
    /// Signature digest
    pub hash: HashAlgorithm,
}

impl CircuitConfig {
    /// Current secure QR codes: 121×17 words, SHA-256, V2 layout
    pub const fn v2() -> Self {
        Self {
            word_bits: 121,
            word_count: 17,
            max_data_length: 1536,
            layout: QrLayout::V2,
            hash: HashAlgorithm::Sha256,
        }
    }

    /// Legacy QR codes: 64×32 words, SHA-1, V1 layout
    pub const fn legacy() -> Self {
        Self {
            word_bits: 64,
            word_count: 32,
            max_data_length: 1024,
            layout: QrLayout::V1,
            hash: HashAlgorithm::Sha1,
        }
    }

    /// Bits available for a signature or modulus
    pub fn word_budget(&self) -> usize {
        self.word_bits * self.word_count
    }

    /// Reject shapes no circuit could use
    pub fn validate(&self) -> Result<()> {
        if self.word_bits == 0 || self.word_bits > 250 || self.word_count == 0 {
            return Err(ProverError::Config {
                reason: format!(
                    "word shape {}x{} must be non-zero and fit the scalar field",
                    self.word_bits, self.word_count
                ),
            });
        }
        if self.word_budget() < 2048 {
            return Err(ProverError::Config {
                reason: format!("{} bits cannot hold an RSA-2048 value", self.word_budget()),
            });
        }
        if self.max_data_length == 0 || self.max_data_length % 64 != 0 {
            return Err(ProverError::Config {
                reason: format!(
                    "max_data_length {} must be a non-zero multiple of 64",
                    self.max_data_length
                ),
            });
        }
        Ok(())
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self::v2()
    }
}

/// Retry policy for transient artifact fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before retry `n` is `n * base_delay_ms`
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay_ms: 0,
        }
    }

    /// Linear backoff before the given retry (1-based)
    pub fn delay(&self, retry: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(retry)))
    }
}

/// Everything a [`ProofOrchestrator`](crate::ProofOrchestrator) needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Where circuit, proving key and verification key live
    pub artifacts: ArtifactLocations,
    /// Circuit constants
    #[serde(default)]
    pub circuit: CircuitConfig,
    /// Artifact fetch retries
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Directory for cached remote artifacts; memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Decimal Poseidon hash of the trusted signer modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_pubkey_hash: Option<String>,
}

impl OrchestratorConfig {
    /// Configuration with default circuit constants and retries
    pub fn new(artifacts: ArtifactLocations) -> Self {
        Self {
            artifacts,
            circuit: CircuitConfig::default(),
            retry: RetryPolicy::default(),
            cache_dir: None,
            trusted_pubkey_hash: None,
        }
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ProverError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&content)?;
        config.circuit.validate()?;
        debug!("Loaded orchestrator config from {}", path.display());
        Ok(config)
    }

    /// Save as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactLocation;

    #[test]
    fn test_presets_are_valid() {
        CircuitConfig::v2().validate().unwrap();
        CircuitConfig::legacy().validate().unwrap();
        assert_eq!(CircuitConfig::v2().word_budget(), 2057);
        assert_eq!(CircuitConfig::legacy().word_budget(), 2048);
    }

    #[test]
    fn test_invalid_shapes() {
        let mut config = CircuitConfig::v2();
        config.word_count = 16;
        assert!(config.validate().is_err());

        let mut config = CircuitConfig::v2();
        config.max_data_length = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1).as_millis(), 250);
        assert_eq!(policy.delay(3).as_millis(), 750);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prover.toml");

        let mut config = OrchestratorConfig::new(ArtifactLocations {
            circuit: ArtifactLocation::Local {
                path: "build/circuit.json".into(),
            },
            proving_key: ArtifactLocation::Chunked {
                urls: vec![
                    "https://example.org/pk/0.gz".into(),
                    "https://example.org/pk/1.gz".into(),
                ],
            },
            verification_key: ArtifactLocation::Remote {
                url: "https://example.org/vk.json".into(),
            },
        });
        config.circuit = CircuitConfig::legacy();
        config.trusted_pubkey_hash = Some("42".into());
        config.save(&path).unwrap();

        let loaded = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let toml = r#"
            [artifacts.circuit]
            kind = "local"
            path = "circuit.json"

            [artifacts.proving_key]
            kind = "local"
            path = "pk.bin"

            [artifacts.verification_key]
            kind = "local"
            path = "vk.json"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.circuit, CircuitConfig::v2());
        assert_eq!(config.retry.attempts, 3);
        assert!(config.cache_dir.is_none());
    }
}
