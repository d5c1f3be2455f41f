//! Poseidon hashing over BN254 and the Keccak signal hash

use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{
    find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge,
};
use ark_crypto_primitives::sponge::{CryptographicSponge, FieldBasedCryptographicSponge};
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use num_traits::Num;
use tiny_keccak::{Hasher, Keccak};

use crate::config::CircuitConfig;
use crate::error::{ProverError, Result};
use crate::words::{split_to_words, WordArray};

/// Bytes packed into one field element
pub const PACK_WIDTH: usize = 31;

const RATE: usize = 2;
const CAPACITY: usize = 1;
const FULL_ROUNDS: usize = 8;
const PARTIAL_ROUNDS: usize = 57;
const ALPHA: u64 = 5;

/// Shared Poseidon parameters for the native and in-circuit sponges
pub(crate) fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    static CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            u64::from(Fr::MODULUS_BIT_SIZE),
            RATE,
            FULL_ROUNDS as u64,
            PARTIAL_ROUNDS as u64,
            0,
        );
        PoseidonConfig::new(FULL_ROUNDS, PARTIAL_ROUNDS, ALPHA, mds, ark, RATE, CAPACITY)
    })
}

/// Poseidon sponge hasher (width 3, x^5 S-box)
#[derive(Clone, Copy)]
pub struct PoseidonHasher {
    config: &'static PoseidonConfig<Fr>,
}

impl Default for PoseidonHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoseidonHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseidonHasher")
            .field("rate", &self.config.rate)
            .field("full_rounds", &self.config.full_rounds)
            .field("partial_rounds", &self.config.partial_rounds)
            .finish()
    }
}

impl PoseidonHasher {
    /// Hasher sharing the process-wide round constants
    pub fn new() -> Self {
        Self {
            config: poseidon_config(),
        }
    }

    /// Hash field elements
    pub fn hash(&self, inputs: &[Fr]) -> Result<Fr> {
        if inputs.is_empty() {
            return Err(ProverError::InvalidInput {
                field: "poseidon inputs".into(),
                value: "[]".into(),
                expected: "at least one element".into(),
            });
        }

        let mut sponge = PoseidonSponge::new(self.config);
        sponge.absorb(&inputs.to_vec());
        sponge
            .squeeze_native_field_elements(1)
            .into_iter()
            .next()
            .ok_or_else(|| ProverError::ArkError("Poseidon squeeze returned nothing".into()))
    }

    /// Hash a byte string packed into 31-byte elements
    pub fn hash_bytes(&self, bytes: &[u8]) -> Result<Fr> {
        let mut packed = pack_bytes(bytes);
        if packed.is_empty() {
            packed.push(Fr::from(0u64));
        }
        self.hash(&packed)
    }

    /// `Poseidon(seed, Poseidon(packed bytes))`
    pub fn nullifier(&self, seed: &Fr, bytes: &[u8]) -> Result<Fr> {
        let inner = self.hash_bytes(bytes)?;
        self.hash(&[*seed, inner])
    }
}

/// Pack bytes little-endian into field elements of 31 bytes each
pub fn pack_bytes(bytes: &[u8]) -> Vec<Fr> {
    bytes
        .chunks(PACK_WIDTH)
        .map(Fr::from_le_bytes_mod_order)
        .collect()
}

/// Poseidon hash of the modulus words, the value a proof pins its signer to
pub fn pubkey_hash(modulus: &BigUint, config: &CircuitConfig) -> Result<Fr> {
    let words = split_to_words(modulus, config.word_bits, config.word_count)?;
    pubkey_hash_words(&words)
}

/// [`pubkey_hash`] over already split words
pub fn pubkey_hash_words(words: &WordArray) -> Result<Fr> {
    let elements: Vec<Fr> = words.words().iter().map(biguint_to_fr).collect();
    PoseidonHasher::new().hash(&elements)
}

/// Keccak-256 of the signal shifted right by 8 bits, so it fits the scalar field
pub fn signal_hash(signal: &[u8]) -> BigUint {
    let mut keccak = Keccak::v256();
    let mut digest = [0u8; 32];
    keccak.update(signal);
    keccak.finalize(&mut digest);
    BigUint::from_bytes_be(&digest) >> 8u32
}

/// Reduce an integer into the scalar field
pub fn biguint_to_fr(value: &BigUint) -> Fr {
    Fr::from_le_bytes_mod_order(&value.to_bytes_le())
}

/// Canonical integer of a field element
pub fn fr_to_biguint(value: &Fr) -> BigUint {
    BigUint::from_bytes_le(&value.into_bigint().to_bytes_le())
}

/// Parse a decimal string into a field element, rejecting non-canonical values
pub fn string_to_fr(s: &str) -> Result<Fr> {
    let value = BigUint::from_str_radix(s, 10).map_err(|e| ProverError::InvalidInput {
        field: "field element".into(),
        value: s.to_string(),
        expected: format!("decimal integer ({e})"),
    })?;

    let modulus: BigUint = Fr::MODULUS.into();
    if value >= modulus {
        return Err(ProverError::InvalidInput {
            field: "field element".into(),
            value: s.to_string(),
            expected: "value below the BN254 scalar modulus".into(),
        });
    }
    Ok(biguint_to_fr(&value))
}

/// Decimal rendering of a field element
pub fn fr_to_string(f: &Fr) -> String {
    fr_to_biguint(f).to_string()
}
