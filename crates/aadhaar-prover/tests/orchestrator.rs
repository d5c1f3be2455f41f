//! End-to-end proving through the orchestrator with locally generated keys

use std::sync::Arc;

use aadhaar_prover::artifacts::{ArtifactFetcher, MemoryStore, Transport};
use aadhaar_prover::codec::{decode_qr_payload, encode_qr_payload};
use aadhaar_prover::engine::{DevelopmentKeys, CIRCUIT_FILE, PROVING_KEY_FILE};
use aadhaar_prover::hashing::{fr_to_string, pubkey_hash};
use aadhaar_prover::{
    serialize_claim, ArtifactLocation, ArtifactLocations, CircuitConfig, Groth16Engine, Proof,
    ProofOrchestrator, ProofResult, ProverArtifacts, ProverError, ProverState, ProvingEngine,
    PublicKeyMaterial, PublicSignal, PublicSignals, RetryPolicy, RevealFlags, SerializedClaim,
    VerificationError, Witness,
};
use async_trait::async_trait;
use num_bigint::BigUint;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

const TEST_CERT: &str = include_str!("fixtures/test_cert.pem");
const TEST_QR: &str = include_str!("fixtures/test_qr_v2.txt");

struct Offline;

#[async_trait]
impl Transport for Offline {
    async fn get(&self, url: &str) -> aadhaar_prover::Result<Vec<u8>> {
        Err(ProverError::ArtifactFetch {
            location: url.into(),
            reason: "offline".into(),
        })
    }
}

fn fetcher() -> ArtifactFetcher {
    ArtifactFetcher::new(
        Arc::new(Offline),
        Arc::new(MemoryStore::new()),
        RetryPolicy::none(),
    )
}

fn seed() -> BigUint {
    BigUint::from(12_345_678u32)
}

fn keys() -> Vec<PublicKeyMaterial> {
    vec![PublicKeyMaterial::from_pem(TEST_CERT).unwrap()]
}

fn setup() -> (TempDir, ArtifactLocations) {
    let dir = tempfile::tempdir().unwrap();
    let keys: DevelopmentKeys =
        Groth16Engine::setup(CircuitConfig::v2(), &mut StdRng::seed_from_u64(7)).unwrap();
    let locations = keys.write_to(dir.path()).unwrap();
    (dir, locations)
}

fn groth16_orchestrator(locations: ArtifactLocations) -> ProofOrchestrator {
    let orchestrator =
        ProofOrchestrator::new(Arc::new(Groth16Engine::new()), fetcher(), CircuitConfig::v2());
    orchestrator.init(locations);
    orchestrator
}

#[tokio::test]
async fn test_prove_verify_and_serialize() {
    let (_dir, locations) = setup();
    let orchestrator = groth16_orchestrator(locations);

    let reveal = RevealFlags {
        age_above_18: true,
        state: true,
        ..RevealFlags::none()
    };
    let witness = orchestrator
        .build_witness(TEST_QR, &keys(), b"1", &seed(), reveal)
        .unwrap();

    let result = orchestrator.prove(witness).await.unwrap();
    assert_eq!(orchestrator.state(), ProverState::Completed);
    assert_eq!(
        result.public_signals.get(PublicSignal::Timestamp),
        &BigUint::from(1_552_023_000u64)
    );
    assert_eq!(result.public_signals.get(PublicSignal::NullifierSeed), &seed());
    assert_eq!(
        result.public_signals.get(PublicSignal::Gender),
        &BigUint::from(0u8)
    );

    assert!(orchestrator.verify_result(&result, None).await.unwrap());

    let claim = orchestrator.project_claim(&result.public_signals, &reveal);
    assert_eq!(claim.age_above_18, Some(true));
    assert_eq!(claim.state.as_deref(), Some("Delhi"));
    assert!(claim.gender.is_none());
    assert!(claim.pincode.is_none());

    let json = serialize_claim(&claim, &result).unwrap();
    let parsed = SerializedClaim::parse(&json).unwrap();
    assert_eq!(parsed.claim, claim);
    let restored = parsed.to_proof_result().unwrap();
    assert_eq!(restored, result);
    assert!(orchestrator.verify_result(&restored, None).await.unwrap());
}

#[tokio::test]
async fn test_pubkey_hash_binding() {
    let (_dir, locations) = setup();
    let orchestrator = groth16_orchestrator(locations);
    let witness = orchestrator
        .build_witness(TEST_QR, &keys(), b"1", &seed(), RevealFlags::none())
        .unwrap();
    let result = orchestrator.prove(witness).await.unwrap();

    let trusted = fr_to_string(&pubkey_hash(keys()[0].modulus(), &CircuitConfig::v2()).unwrap());
    assert_eq!(
        result.public_signals.get(PublicSignal::PubkeyHash).to_string(),
        trusted
    );
    assert!(orchestrator
        .verify_result(&result, Some(trusted.as_str()))
        .await
        .unwrap());

    let err = orchestrator
        .verify_result(&result, Some("1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProverError::Verification(VerificationError::KeyMismatch { .. })
    ));
}

#[tokio::test]
async fn test_forged_signals_rejected() {
    let (_dir, locations) = setup();
    let orchestrator = groth16_orchestrator(locations);
    let witness = orchestrator
        .build_witness(TEST_QR, &keys(), b"1", &seed(), RevealFlags::all())
        .unwrap();
    let result = orchestrator.prove(witness).await.unwrap();

    let mut values = result.public_signals.values().to_vec();
    values[PublicSignal::AgeAbove18.index()] = BigUint::from(0u8);
    let forged = PublicSignals::new(values).unwrap();
    assert!(!orchestrator
        .verify(&result.proof, &forged, None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_resident_artifacts_reused_until_locations_change() {
    let (dir, locations) = setup();
    let orchestrator = groth16_orchestrator(locations.clone());
    let witness = orchestrator
        .build_witness(TEST_QR, &keys(), b"1", &seed(), RevealFlags::none())
        .unwrap();

    orchestrator.prove(witness.clone()).await.unwrap();

    std::fs::remove_file(dir.path().join(CIRCUIT_FILE)).unwrap();
    std::fs::remove_file(dir.path().join(PROVING_KEY_FILE)).unwrap();

    // Same locations: served from memory
    orchestrator.init(locations.clone());
    orchestrator.prove(witness.clone()).await.unwrap();

    let moved = ArtifactLocations {
        proving_key: ArtifactLocation::Local {
            path: dir.path().join("elsewhere.bin"),
        },
        ..locations
    };
    orchestrator.init(moved);
    assert!(matches!(
        orchestrator.prove(witness).await,
        Err(ProverError::ArtifactFetch { .. })
    ));
    assert_eq!(orchestrator.state(), ProverState::Error);
}

#[test]
fn test_tampered_payload_rejected() {
    let mut payload = decode_qr_payload(TEST_QR).unwrap();
    // Inside the name field
    payload[30] ^= 0x01;
    let tampered = encode_qr_payload(&payload).unwrap();

    let err = aadhaar_prover::WitnessBuilder::new(CircuitConfig::v2())
        .build_with_any_key(&tampered, &keys(), b"1", &seed(), RevealFlags::none())
        .unwrap_err();
    assert!(matches!(
        err,
        ProverError::Verification(VerificationError::InvalidSignature)
    ));
}

/// Blocks inside `full_prove` until released
struct GatedEngine {
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl ProvingEngine for GatedEngine {
    fn full_prove(&self, _: &ProverArtifacts, _: &Witness) -> aadhaar_prover::Result<ProofResult> {
        self.release.lock().recv().map_err(|e| ProverError::Proving {
            reason: e.to_string(),
        })?;
        let signals = PublicSignals::new(vec![BigUint::from(0u8); PublicSignal::COUNT])?;
        Ok(ProofResult::new(Proof::new(Default::default()), signals))
    }

    fn verify(&self, _: &[u8], _: &PublicSignals, _: &Proof) -> aadhaar_prover::Result<bool> {
        Ok(false)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_prove_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str| {
        let path = dir.path().join(name);
        std::fs::write(&path, b"stub").unwrap();
        ArtifactLocation::Local { path }
    };
    let locations = ArtifactLocations {
        circuit: write("circuit.json"),
        proving_key: write("pk.bin"),
        verification_key: write("vk.json"),
    };

    let (release, gate) = std::sync::mpsc::channel();
    let engine = GatedEngine {
        release: Mutex::new(gate),
    };
    let orchestrator = Arc::new(ProofOrchestrator::new(
        Arc::new(engine),
        fetcher(),
        CircuitConfig::v2(),
    ));
    orchestrator.init(locations.clone());

    let witness = orchestrator
        .build_witness(TEST_QR, &keys(), b"1", &seed(), RevealFlags::none())
        .unwrap();

    let mut states = orchestrator.subscribe();
    let first = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let witness = witness.clone();
        async move { orchestrator.prove(witness).await }
    });

    states
        .wait_for(|state| *state == ProverState::Proving)
        .await
        .unwrap();
    assert!(matches!(
        orchestrator.prove(witness).await,
        Err(ProverError::Busy)
    ));

    // Re-initialising mid-proof does not hide the running attempt
    orchestrator.init(locations);
    assert_eq!(orchestrator.state(), ProverState::Proving);

    release.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(orchestrator.state(), ProverState::Completed);
}
