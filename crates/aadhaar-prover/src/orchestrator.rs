//! Proof lifecycle: artifact acquisition, proving and verification

use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigUint;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::artifacts::{
    ArtifactFetcher, ArtifactLocations, ArtifactStore, FsStore, HttpTransport, MemoryStore,
    ProverArtifacts,
};
use crate::certificate::PublicKeyMaterial;
use crate::claim::{project_claim, Claim, PublicSignal, PublicSignals};
use crate::config::{CircuitConfig, OrchestratorConfig};
use crate::engine::ProvingEngine;
use crate::error::{ProverError, Result, VerificationError};
use crate::proof::{Proof, ProofResult};
use crate::witness::{RevealFlags, Witness, WitnessBuilder};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Observable progress of the current proof attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProverState {
    Initializing,
    FetchingArtifact,
    Proving,
    Completed,
    Error,
}

/// Drives one proof at a time against configured artifacts
pub struct ProofOrchestrator {
    engine: Arc<dyn ProvingEngine>,
    fetcher: ArtifactFetcher,
    circuit: CircuitConfig,
    trusted_pubkey_hash: Option<String>,
    locations: RwLock<Option<ArtifactLocations>>,
    resident: RwLock<Option<(ArtifactLocations, Arc<ProverArtifacts>)>>,
    state: watch::Sender<ProverState>,
    in_flight: Mutex<()>,
}

impl std::fmt::Debug for ProofOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofOrchestrator")
            .field("circuit", &self.circuit)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProofOrchestrator {
    /// Orchestrator without artifact locations; call [`init`](Self::init) before proving
    pub fn new(
        engine: Arc<dyn ProvingEngine>,
        fetcher: ArtifactFetcher,
        circuit: CircuitConfig,
    ) -> Self {
        let (state, _) = watch::channel(ProverState::Initializing);
        Self {
            engine,
            fetcher,
            circuit,
            trusted_pubkey_hash: None,
            locations: RwLock::new(None),
            resident: RwLock::new(None),
            state,
            in_flight: Mutex::new(()),
        }
    }

    /// Pin verification to a signer key hash (decimal)
    pub fn with_trusted_pubkey_hash(mut self, hash: impl Into<String>) -> Self {
        self.trusted_pubkey_hash = Some(hash.into());
        self
    }

    /// Orchestrator with HTTP transport and the configured cache
    pub fn from_config(config: &OrchestratorConfig, engine: Arc<dyn ProvingEngine>) -> Result<Self> {
        config.circuit.validate()?;

        let store: Arc<dyn ArtifactStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FsStore::new(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        let fetcher = ArtifactFetcher::new(
            Arc::new(HttpTransport::new(HTTP_TIMEOUT)?),
            store,
            config.retry,
        );

        let mut orchestrator = Self::new(engine, fetcher, config.circuit);
        orchestrator.trusted_pubkey_hash = config.trusted_pubkey_hash.clone();
        orchestrator.init(config.artifacts.clone());
        Ok(orchestrator)
    }

    /// Record where artifacts live. Switching sources drops resident artifacts.
    ///
    /// A proof already in flight keeps its artifacts and its observable state.
    pub fn init(&self, locations: ArtifactLocations) {
        let mut resident = self.resident.write();
        if resident.as_ref().is_some_and(|(loaded, _)| *loaded != locations) {
            debug!("Artifact locations changed, dropping resident artifacts");
            *resident = None;
        }
        *self.locations.write() = Some(locations);

        if self.in_flight.try_lock().is_ok() {
            self.set_state(ProverState::Initializing);
        } else {
            debug!("Proof in flight, state left unchanged");
        }
    }

    /// Circuit constants in use
    pub fn circuit(&self) -> &CircuitConfig {
        &self.circuit
    }

    /// Build a witness for this orchestrator's circuit
    pub fn build_witness(
        &self,
        qr_payload: &str,
        keys: &[PublicKeyMaterial],
        signal: &[u8],
        nullifier_seed: &BigUint,
        reveal: RevealFlags,
    ) -> Result<Witness> {
        WitnessBuilder::new(self.circuit).build_with_any_key(
            qr_payload,
            keys,
            signal,
            nullifier_seed,
            reveal,
        )
    }

    /// Fetch artifacts if needed and prove. Concurrent calls fail with [`ProverError::Busy`].
    #[instrument(skip_all)]
    pub async fn prove(&self, witness: Witness) -> Result<ProofResult> {
        let _lock = self.in_flight.try_lock().map_err(|_| ProverError::Busy)?;
        let mut attempt = AttemptGuard {
            orchestrator: self,
            settled: false,
        };

        let outcome = self.run_proof(witness).await;
        attempt.settled = true;
        match outcome {
            Ok(result) => {
                self.set_state(ProverState::Completed);
                Ok(result)
            }
            Err(e) => {
                warn!("Proof attempt failed: {e}");
                self.set_state(ProverState::Error);
                Err(e)
            }
        }
    }

    async fn run_proof(&self, witness: Witness) -> Result<ProofResult> {
        if witness.config != self.circuit {
            return Err(ProverError::Proving {
                reason: "witness was built for different circuit constants".into(),
            });
        }

        let artifacts = self.resident_artifacts().await?;

        self.set_state(ProverState::Proving);
        let engine = Arc::clone(&self.engine);
        let result = tokio::task::spawn_blocking(move || engine.full_prove(&artifacts, &witness))
            .await
            .map_err(|e| ProverError::Proving {
                reason: format!("proving task failed: {e}"),
            })??;

        info!("Proof ready");
        Ok(result)
    }

    async fn resident_artifacts(&self) -> Result<Arc<ProverArtifacts>> {
        let locations = self.locations()?;
        let cached = self
            .resident
            .read()
            .as_ref()
            .filter(|(loaded, _)| *loaded == locations)
            .map(|(_, artifacts)| Arc::clone(artifacts));
        if let Some(artifacts) = cached {
            return Ok(artifacts);
        }

        self.set_state(ProverState::FetchingArtifact);
        let artifacts = Arc::new(self.fetcher.fetch_prover_artifacts(&locations).await?);
        *self.resident.write() = Some((locations, Arc::clone(&artifacts)));
        Ok(artifacts)
    }

    /// Check a proof. A configured or supplied key hash is compared before any
    /// cryptographic work; a mismatch is an error, not `false`.
    #[instrument(skip_all)]
    pub async fn verify(
        &self,
        proof: &Proof,
        public_signals: &PublicSignals,
        expected_pubkey_hash: Option<&str>,
    ) -> Result<bool> {
        if let Some(expected) = expected_pubkey_hash.or(self.trusted_pubkey_hash.as_deref()) {
            let actual = public_signals.get(PublicSignal::PubkeyHash).to_string();
            if actual != expected.trim() {
                warn!("Proof is bound to an untrusted signer key");
                return Err(VerificationError::KeyMismatch {
                    expected: expected.trim().to_string(),
                    actual,
                }
                .into());
            }
        }

        let locations = self.locations()?;
        let verification_key = self.fetcher.fetch(&locations.verification_key).await?;

        let engine = Arc::clone(&self.engine);
        let proof = proof.clone();
        let signals = public_signals.clone();
        tokio::task::spawn_blocking(move || engine.verify(&verification_key, &signals, &proof))
            .await
            .map_err(|e| {
                ProverError::from(VerificationError::ProofRejected {
                    reason: format!("verification task failed: {e}"),
                })
            })?
    }

    /// [`verify`](Self::verify) for a proof result
    pub async fn verify_result(
        &self,
        result: &ProofResult,
        expected_pubkey_hash: Option<&str>,
    ) -> Result<bool> {
        self.verify(&result.proof, &result.public_signals, expected_pubkey_hash)
            .await
    }

    /// Project revealed signals into a claim
    pub fn project_claim(&self, public_signals: &PublicSignals, reveal: &RevealFlags) -> Claim {
        project_claim(public_signals, reveal)
    }

    /// Back to `Initializing` for a fresh attempt; cached artifacts are kept
    pub fn reset(&self) {
        self.set_state(ProverState::Initializing);
    }

    /// Current state
    pub fn state(&self) -> ProverState {
        *self.state.borrow()
    }

    /// Receiver of state changes
    pub fn subscribe(&self) -> watch::Receiver<ProverState> {
        self.state.subscribe()
    }

    fn locations(&self) -> Result<ArtifactLocations> {
        self.locations.read().clone().ok_or_else(|| ProverError::Config {
            reason: "artifact locations not set; call init first".into(),
        })
    }

    fn set_state(&self, state: ProverState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "Prover state changed");
        }
    }
}

/// Returns the state to `Initializing` when a `prove` future is dropped
/// before it settles
struct AttemptGuard<'a> {
    orchestrator: &'a ProofOrchestrator,
    settled: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Proof attempt abandoned");
            self.orchestrator.set_state(ProverState::Initializing);
        }
    }
}
