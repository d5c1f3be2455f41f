//! Native claim circuit
//!
//! Public outputs are computed natively from the witness (signature check,
//! field extraction, Poseidon commitments). The R1CS proves the Poseidon
//! relations between the outputs and enforces the reveal gating of each
//! attribute.
//!
//! This is a development circuit. RSA verification, SHA padding, field
//! extraction, the timestamp and the age comparison are not constrained, so
//! a prover holding the proving key can still choose those values freely.
//! Production proofs need the full Circom circuit behind a different
//! [`ProvingEngine`](crate::engine::ProvingEngine).

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
use num_bigint::BigUint;
use tracing::debug;

use crate::certificate::check_signature;
use crate::claim::{pack_text, PublicSignal, PublicSignals};
use crate::config::CircuitConfig;
use crate::error::{ProverError, Result};
use crate::fields::{is_age_above, Field, FieldTable};
use crate::hashing::{biguint_to_fr, fr_to_biguint, poseidon_config, PoseidonHasher, PACK_WIDTH};
use crate::witness::{RevealFlags, Witness};
use crate::words::join_words;

/// RSA public exponent of the QR signer
pub const RSA_EXPONENT: u32 = 65537;

/// Age threshold exposed by the circuit
pub const AGE_THRESHOLD: u32 = 18;

/// Every output of the claim circuit before reveal gating, with the private
/// values the hashed outputs are derived from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimOutputs {
    pub identity_nullifier: Fr,
    pub user_nullifier: Fr,
    pub timestamp: Fr,
    pub pubkey_hash: Fr,
    pub signal_hash: Fr,
    pub age_above_18: bool,
    pub gender: Fr,
    pub pincode: Fr,
    pub state: Fr,
    pub nullifier_seed: Fr,
    /// Signer modulus words hashed into `pubkey_hash`
    pub pub_key_words: Vec<Fr>,
    /// Poseidon of the packed identity fields
    pub identity_commitment: Fr,
    /// Poseidon of the packed photo bytes
    pub photo_commitment: Fr,
}

impl ClaimOutputs {
    /// Recompute every output from a witness, rejecting unsigned data
    pub fn compute(witness: &Witness) -> Result<Self> {
        witness.validate()?;
        let config = &witness.config;
        let data = witness.signed_data();

        let signature = join_words(&witness.signature, config.word_bits)?;
        let modulus = join_words(&witness.pub_key, config.word_bits)?;
        if !check_signature(
            &modulus,
            &BigUint::from(RSA_EXPONENT),
            &signature,
            data,
            config.hash,
        ) {
            return Err(ProverError::Proving {
                reason: "witness data does not carry a valid signature".into(),
            });
        }

        let table = FieldTable::from_signed_data(data, config.layout);
        let timestamp = table.timestamp()?;
        let dob = table.dob()?;

        let hasher = PoseidonHasher::new();
        let seed = biguint_to_fr(&witness.nullifier_seed);

        let mut identity = Vec::new();
        for field in [
            Field::PhoneLast4,
            Field::Name,
            Field::Dob,
            Field::Gender,
            Field::PinCode,
        ] {
            identity.extend_from_slice(table.get(field));
        }

        let identity_commitment = hasher.hash_bytes(&identity)?;
        let photo_commitment = hasher.hash_bytes(table.get(Field::Photo))?;
        let pub_key_words: Vec<Fr> = witness.pub_key.words().iter().map(biguint_to_fr).collect();

        let outputs = Self {
            identity_nullifier: hasher.hash(&[seed, identity_commitment])?,
            user_nullifier: hasher.hash(&[seed, photo_commitment])?,
            timestamp: Fr::from(timestamp.max(0) as u64),
            pubkey_hash: hasher.hash(&pub_key_words)?,
            signal_hash: biguint_to_fr(&witness.signal_hash),
            age_above_18: is_age_above(dob, timestamp, AGE_THRESHOLD),
            gender: Fr::from(table.get(Field::Gender).first().copied().unwrap_or(0)),
            pincode: Fr::from(parse_pincode(table.get(Field::PinCode))),
            state: pack_field(table.get(Field::State)),
            nullifier_seed: seed,
            pub_key_words,
            identity_commitment,
            photo_commitment,
        };
        debug!("Computed claim outputs");
        Ok(outputs)
    }

    /// Public signals with unrevealed attributes zeroed
    pub fn public_signals(&self, reveal: &RevealFlags) -> PublicSignals {
        let gate = |flag: bool, value: Fr| if flag { value } else { Fr::from(0u64) };
        let values = [
            self.identity_nullifier,
            self.user_nullifier,
            self.timestamp,
            self.pubkey_hash,
            self.signal_hash,
            gate(reveal.age_above_18, Fr::from(u64::from(self.age_above_18))),
            gate(reveal.gender, self.gender),
            gate(reveal.pincode, self.pincode),
            gate(reveal.state, self.state),
            self.nullifier_seed,
        ];
        debug_assert_eq!(values.len(), PublicSignal::COUNT);
        PublicSignals(values.iter().map(fr_to_biguint).collect())
    }
}

fn parse_pincode(bytes: &[u8]) -> u64 {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return 0;
    }
    bytes
        .iter()
        .fold(0u64, |acc, &b| acc.saturating_mul(10).saturating_add(u64::from(b - b'0')))
}

fn pack_field(bytes: &[u8]) -> Fr {
    biguint_to_fr(&pack_text(&bytes[..bytes.len().min(PACK_WIDTH)]))
}

/// R1CS over the claim outputs.
///
/// Public inputs follow [`PublicSignal::ALL`]. The circuit enforces:
///
/// - `pubkeyHash = Poseidon(modulus words)`
/// - `identityNullifier = Poseidon(nullifierSeed, identity commitment)`
/// - `userNullifier = Poseidon(nullifierSeed, photo commitment)`
/// - each revealed attribute equals `flag · value`, with boolean flags and age bit
///
/// `timestamp` and `signalHash` are only bound as public inputs of the proof.
#[derive(Clone)]
pub struct ClaimCircuit {
    /// Ungated outputs (private)
    pub outputs: ClaimOutputs,
    /// Reveal flags (private)
    pub reveal: RevealFlags,
}

impl ClaimCircuit {
    /// Circuit for one proof
    pub fn new(outputs: ClaimOutputs, reveal: RevealFlags) -> Self {
        Self { outputs, reveal }
    }

    /// Satisfiable circuit with the shape of `config`, used for key generation
    pub fn blank(config: &CircuitConfig) -> Result<Self> {
        config.validate()?;
        let hasher = PoseidonHasher::new();
        let zero = Fr::from(0u64);
        let pub_key_words = vec![zero; config.word_count];
        let nullifier = hasher.hash(&[zero, zero])?;

        let outputs = ClaimOutputs {
            identity_nullifier: nullifier,
            user_nullifier: nullifier,
            pubkey_hash: hasher.hash(&pub_key_words)?,
            pub_key_words,
            ..ClaimOutputs::default()
        };
        Ok(Self::new(outputs, RevealFlags::none()))
    }
}

fn poseidon_var(
    cs: ConstraintSystemRef<Fr>,
    inputs: &[FpVar<Fr>],
) -> std::result::Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::<Fr>::new(cs, poseidon_config());
    sponge.absorb(&inputs)?;
    sponge
        .squeeze_field_elements(1)?
        .into_iter()
        .next()
        .ok_or(SynthesisError::Unsatisfiable)
}

impl ConstraintSynthesizer<Fr> for ClaimCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> std::result::Result<(), SynthesisError> {
        let public = self.outputs.public_signals(&self.reveal);
        let inputs = public
            .to_field_elements()
            .into_iter()
            .map(|value| FpVar::new_input(cs.clone(), || Ok(value)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let input = |signal: PublicSignal| &inputs[signal.index()];

        let age = Boolean::new_witness(cs.clone(), || Ok(self.outputs.age_above_18))?;
        let gender = FpVar::new_witness(cs.clone(), || Ok(self.outputs.gender))?;
        let pincode = FpVar::new_witness(cs.clone(), || Ok(self.outputs.pincode))?;
        let state = FpVar::new_witness(cs.clone(), || Ok(self.outputs.state))?;

        let reveal_age = Boolean::new_witness(cs.clone(), || Ok(self.reveal.age_above_18))?;
        let reveal_gender = Boolean::new_witness(cs.clone(), || Ok(self.reveal.gender))?;
        let reveal_pincode = Boolean::new_witness(cs.clone(), || Ok(self.reveal.pincode))?;
        let reveal_state = Boolean::new_witness(cs.clone(), || Ok(self.reveal.state))?;

        let zero = FpVar::<Fr>::zero();
        let age_value: FpVar<Fr> = age.into();

        for (flag, value, signal) in [
            (&reveal_age, &age_value, PublicSignal::AgeAbove18),
            (&reveal_gender, &gender, PublicSignal::Gender),
            (&reveal_pincode, &pincode, PublicSignal::Pincode),
            (&reveal_state, &state, PublicSignal::State),
        ] {
            let gated = flag.select(value, &zero)?;
            gated.enforce_equal(input(signal))?;
        }

        let words = self
            .outputs
            .pub_key_words
            .iter()
            .map(|word| FpVar::new_witness(cs.clone(), || Ok(*word)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        poseidon_var(cs.clone(), &words)?.enforce_equal(input(PublicSignal::PubkeyHash))?;

        let seed = input(PublicSignal::NullifierSeed);
        for (commitment, signal) in [
            (self.outputs.identity_commitment, PublicSignal::IdentityNullifier),
            (self.outputs.photo_commitment, PublicSignal::UserNullifier),
        ] {
            let commitment = FpVar::new_witness(cs.clone(), || Ok(commitment))?;
            poseidon_var(cs.clone(), &[seed.clone(), commitment])?.enforce_equal(input(signal))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::WitnessBuilder;
    use ark_relations::r1cs::ConstraintSystem;

    const TEST_CERT: &str = include_str!("../tests/fixtures/test_cert.pem");
    const TEST_QR: &str = include_str!("../tests/fixtures/test_qr_v2.txt");

    fn witness(reveal: RevealFlags) -> Witness {
        WitnessBuilder::new(CircuitConfig::v2())
            .build(TEST_QR, TEST_CERT, b"1", &BigUint::from(12345678u32), reveal)
            .unwrap()
    }

    #[test]
    fn test_outputs_from_fixture() {
        let outputs = ClaimOutputs::compute(&witness(RevealFlags::all())).unwrap();
        assert_eq!(outputs.timestamp, Fr::from(1_552_023_000u64));
        assert!(outputs.age_above_18);
        assert_eq!(outputs.gender, Fr::from(u64::from(b'M')));
        assert_eq!(outputs.pincode, Fr::from(110_051u64));
        assert_eq!(outputs.state, biguint_to_fr(&pack_text(b"Delhi")));
        assert_eq!(outputs.nullifier_seed, Fr::from(12_345_678u64));
        assert_ne!(outputs.identity_nullifier, outputs.user_nullifier);
        assert_eq!(outputs.pub_key_words.len(), 17);

        let hasher = PoseidonHasher::new();
        assert_eq!(
            outputs.user_nullifier,
            hasher
                .hash(&[outputs.nullifier_seed, outputs.photo_commitment])
                .unwrap()
        );
    }

    #[test]
    fn test_tampered_witness_rejected() {
        let mut witness = witness(RevealFlags::all());
        witness.qr_data_padded[30] ^= 0x01;
        assert!(matches!(
            ClaimOutputs::compute(&witness),
            Err(ProverError::Proving { .. })
        ));
    }

    #[test]
    fn test_gating_zeroes_hidden_attributes() {
        let outputs = ClaimOutputs::compute(&witness(RevealFlags::all())).unwrap();
        let hidden = outputs.public_signals(&RevealFlags::none());
        for signal in [
            PublicSignal::AgeAbove18,
            PublicSignal::Gender,
            PublicSignal::Pincode,
            PublicSignal::State,
        ] {
            assert_eq!(hidden.get(signal), &BigUint::from(0u8));
        }
        assert_eq!(
            hidden.get(PublicSignal::Timestamp),
            &BigUint::from(1_552_023_000u64)
        );
    }

    #[test]
    fn test_circuit_satisfiable() {
        let outputs = ClaimOutputs::compute(&witness(RevealFlags::all())).unwrap();
        for reveal in [RevealFlags::all(), RevealFlags::none()] {
            let cs = ConstraintSystem::<Fr>::new_ref();
            ClaimCircuit::new(outputs.clone(), reveal)
                .generate_constraints(cs.clone())
                .unwrap();
            assert!(cs.is_satisfied().unwrap());
            assert_eq!(cs.num_instance_variables(), PublicSignal::COUNT + 1);
        }
    }

    #[test]
    fn test_blank_circuit_matches_shape() {
        for config in [CircuitConfig::v2(), CircuitConfig::legacy()] {
            let cs = ConstraintSystem::<Fr>::new_ref();
            ClaimCircuit::blank(&config)
                .unwrap()
                .generate_constraints(cs.clone())
                .unwrap();
            assert!(cs.is_satisfied().unwrap());
            assert!(cs.num_witness_variables() > config.word_count);
        }

        let real = ConstraintSystem::<Fr>::new_ref();
        let outputs = ClaimOutputs::compute(&witness(RevealFlags::all())).unwrap();
        ClaimCircuit::new(outputs, RevealFlags::all())
            .generate_constraints(real.clone())
            .unwrap();
        let blank = ConstraintSystem::<Fr>::new_ref();
        ClaimCircuit::blank(&CircuitConfig::v2())
            .unwrap()
            .generate_constraints(blank.clone())
            .unwrap();
        assert_eq!(real.num_constraints(), blank.num_constraints());
    }

    fn satisfied(outputs: ClaimOutputs, reveal: RevealFlags) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        ClaimCircuit::new(outputs, reveal)
            .generate_constraints(cs.clone())
            .unwrap();
        cs.is_satisfied().unwrap()
    }

    #[test]
    fn test_unsigned_outputs_unsatisfiable() {
        let forged = ClaimOutputs {
            pubkey_hash: Fr::from(42u64),
            age_above_18: true,
            ..ClaimOutputs::default()
        };
        assert!(!satisfied(forged, RevealFlags::all()));

        let outputs = ClaimOutputs::compute(&witness(RevealFlags::all())).unwrap();
        assert!(satisfied(outputs.clone(), RevealFlags::all()));

        let mut wrong_key = outputs.clone();
        wrong_key.pubkey_hash = Fr::from(42u64);
        assert!(!satisfied(wrong_key, RevealFlags::all()));

        let mut other_signer = outputs.clone();
        other_signer.pub_key_words[0] += Fr::from(1u64);
        assert!(!satisfied(other_signer, RevealFlags::all()));

        let mut wrong_nullifier = outputs.clone();
        wrong_nullifier.identity_nullifier = Fr::from(7u64);
        assert!(!satisfied(wrong_nullifier, RevealFlags::all()));

        let mut reseeded = outputs;
        reseeded.nullifier_seed += Fr::from(1u64);
        assert!(!satisfied(reseeded, RevealFlags::all()));
    }
}
