//! Circuit witness assembly from a scanned QR payload

use ark_bn254::Fr;
use ark_ff::PrimeField;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::certificate::{verify_with_any, PublicKeyMaterial};
use crate::circuit::RSA_EXPONENT;
use crate::codec::decode_qr_payload;
use crate::config::CircuitConfig;
use crate::error::{ProverError, Result, VerificationError};
use crate::fields::{delimiter_indices, split_signed_message};
use crate::hashing::signal_hash;
use crate::words::{split_to_words, WordArray};

/// SHA-1 and SHA-256 block size
const SHA_BLOCK: usize = 64;

/// Circuit inputs that are arrays; everything else is a scalar
const ARRAY_SIGNALS: [&str; 4] = ["qrDataPadded", "delimiterIndices", "signature", "pubKey"];

/// Which attributes the proof exposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealFlags {
    #[serde(rename = "revealAgeAbove18")]
    pub age_above_18: bool,
    #[serde(rename = "revealGender")]
    pub gender: bool,
    #[serde(rename = "revealPinCode")]
    pub pincode: bool,
    #[serde(rename = "revealState")]
    pub state: bool,
}

impl RevealFlags {
    /// Reveal nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Reveal every attribute
    pub fn all() -> Self {
        Self {
            age_above_18: true,
            gender: true,
            pincode: true,
            state: true,
        }
    }
}

/// Named inputs for one proof attempt.
///
/// Holds private identity data; never log or persist it.
#[derive(Clone, PartialEq, Eq)]
pub struct Witness {
    /// Signed data with SHA padding, zero-filled to `max_data_length`
    pub qr_data_padded: Vec<u8>,
    /// Length of the SHA-padded prefix
    pub qr_data_padded_length: usize,
    /// Length of the signed data before padding
    pub data_length: usize,
    /// Offsets of the layout's delimiters within the signed data
    pub delimiter_indices: Vec<usize>,
    /// RSA signature words
    pub signature: WordArray,
    /// RSA modulus words
    pub pub_key: WordArray,
    /// Application-chosen nullifier seed
    pub nullifier_seed: BigUint,
    /// Keccak signal hash
    pub signal_hash: BigUint,
    /// Attributes to expose
    pub reveal: RevealFlags,
    /// Constants the witness was built for
    pub config: CircuitConfig,
}

impl std::fmt::Debug for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Witness")
            .field("data_length", &self.data_length)
            .field("qr_data_padded_length", &self.qr_data_padded_length)
            .field("reveal", &self.reveal)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Witness {
    /// Signed data without padding
    pub fn signed_data(&self) -> &[u8] {
        &self.qr_data_padded[..self.data_length.min(self.qr_data_padded.len())]
    }

    /// Check every field against the circuit shape
    pub fn validate(&self) -> Result<()> {
        let config = &self.config;
        expect_len("qrDataPadded", config.max_data_length, self.qr_data_padded.len())?;
        expect_len(
            "delimiterIndices",
            config.layout.delimiter_count(),
            self.delimiter_indices.len(),
        )?;
        expect_len("signature", config.word_count, self.signature.len())?;
        expect_len("pubKey", config.word_count, self.pub_key.len())?;

        let padded = self.qr_data_padded_length;
        if padded % SHA_BLOCK != 0
            || padded > config.max_data_length
            || padded < self.data_length + 9
        {
            return Err(ProverError::IncompleteWitness {
                field: "qrDataPaddedLength".into(),
                expected: sha_padded_length(self.data_length),
                actual: padded,
            });
        }

        if self
            .delimiter_indices
            .iter()
            .any(|&i| i >= self.data_length)
        {
            return Err(ProverError::InvalidInput {
                field: "delimiterIndices".into(),
                value: format!("{:?}", self.delimiter_indices.last()),
                expected: format!("offsets below {}", self.data_length),
            });
        }

        for (name, value) in [
            ("nullifierSeed", &self.nullifier_seed),
            ("signalHash", &self.signal_hash),
        ] {
            if !fits_field(value) {
                return Err(ProverError::InvalidInput {
                    field: name.into(),
                    value: value.to_string(),
                    expected: "value below the BN254 scalar modulus".into(),
                });
            }
        }
        Ok(())
    }

    /// `(signal name, values)` pairs in circuit input order
    pub fn to_circuit_input(&self) -> Vec<(String, Vec<BigUint>)> {
        let flag = |b: bool| vec![BigUint::from(u8::from(b))];
        vec![
            (
                "qrDataPadded".into(),
                self.qr_data_padded.iter().map(|&b| BigUint::from(b)).collect(),
            ),
            (
                "qrDataPaddedLength".into(),
                vec![BigUint::from(self.qr_data_padded_length)],
            ),
            ("dataLength".into(), vec![BigUint::from(self.data_length)]),
            (
                "delimiterIndices".into(),
                self.delimiter_indices.iter().map(|&i| BigUint::from(i)).collect(),
            ),
            ("signature".into(), self.signature.words().to_vec()),
            ("pubKey".into(), self.pub_key.words().to_vec()),
            ("nullifierSeed".into(), vec![self.nullifier_seed.clone()]),
            ("signalHash".into(), vec![self.signal_hash.clone()]),
            ("revealAgeAbove18".into(), flag(self.reveal.age_above_18)),
            ("revealGender".into(), flag(self.reveal.gender)),
            ("revealPinCode".into(), flag(self.reveal.pincode)),
            ("revealState".into(), flag(self.reveal.state)),
        ]
    }

    /// Circuit input JSON with decimal strings, as witness calculators read it
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, values) in self.to_circuit_input() {
            let mut strings: Vec<Value> =
                values.iter().map(|v| Value::String(v.to_string())).collect();
            let value = if ARRAY_SIGNALS.contains(&name.as_str()) || strings.len() != 1 {
                Value::Array(strings)
            } else {
                strings.remove(0)
            };
            map.insert(name, value);
        }
        Value::Object(map)
    }
}

/// Builds witnesses for one circuit configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct WitnessBuilder {
    config: CircuitConfig,
}

impl WitnessBuilder {
    /// Builder for the given circuit constants
    pub fn new(config: CircuitConfig) -> Self {
        Self { config }
    }

    /// Circuit constants in use
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Decode, verify and assemble a witness against one signer certificate
    pub fn build(
        &self,
        qr_payload: &str,
        certificate_pem: &str,
        signal: &[u8],
        nullifier_seed: &BigUint,
        reveal: RevealFlags,
    ) -> Result<Witness> {
        let key = PublicKeyMaterial::from_pem(certificate_pem)?;
        self.build_with_any_key(qr_payload, &[key], signal, nullifier_seed, reveal)
    }

    /// As [`build`](Self::build), accepting whichever trusted key signed the payload
    #[instrument(skip_all, fields(layout = ?self.config.layout, keys = keys.len()))]
    pub fn build_with_any_key(
        &self,
        qr_payload: &str,
        keys: &[PublicKeyMaterial],
        signal: &[u8],
        nullifier_seed: &BigUint,
        reveal: RevealFlags,
    ) -> Result<Witness> {
        let payload = decode_qr_payload(qr_payload)?;
        let (data, signature) = split_signed_message(&payload)?;

        let matched = verify_with_any(keys, signature, data, self.config.hash)?;
        let Some(index) = matched.key_index else {
            warn!("Refusing to build witness for unverified payload");
            return Err(VerificationError::InvalidSignature.into());
        };

        self.assemble(data, signature, &keys[index], signal, nullifier_seed, reveal)
    }

    /// Assemble from already verified parts
    pub fn assemble(
        &self,
        data: &[u8],
        signature: &[u8],
        key: &PublicKeyMaterial,
        signal: &[u8],
        nullifier_seed: &BigUint,
        reveal: RevealFlags,
    ) -> Result<Witness> {
        let config = self.config;
        config.validate()?;

        if key.exponent() != &BigUint::from(RSA_EXPONENT) {
            return Err(ProverError::InvalidInput {
                field: "publicKey exponent".into(),
                value: key.exponent().to_string(),
                expected: RSA_EXPONENT.to_string(),
            });
        }

        let (qr_data_padded, qr_data_padded_length) = sha_pad(data, config.max_data_length)?;

        let delimiters = delimiter_indices(data, config.layout.delimiter_count());
        expect_len(
            "delimiterIndices",
            config.layout.delimiter_count(),
            delimiters.len(),
        )?;

        let signature = split_to_words(
            &BigUint::from_bytes_be(signature),
            config.word_bits,
            config.word_count,
        )?;
        let pub_key = split_to_words(key.modulus(), config.word_bits, config.word_count)?;

        let witness = Witness {
            qr_data_padded,
            qr_data_padded_length,
            data_length: data.len(),
            delimiter_indices: delimiters,
            signature,
            pub_key,
            nullifier_seed: nullifier_seed.clone(),
            signal_hash: signal_hash(signal),
            reveal,
            config,
        };
        witness.validate()?;

        info!(
            data_length = witness.data_length,
            padded_length = witness.qr_data_padded_length,
            "Witness assembled"
        );
        Ok(witness)
    }
}

/// SHA message padding (0x80, zeros, 64-bit big-endian bit length) followed
/// by zero fill up to `max_len`. Returns the buffer and the padded length.
pub fn sha_pad(message: &[u8], max_len: usize) -> Result<(Vec<u8>, usize)> {
    let padded_length = sha_padded_length(message.len());
    if padded_length > max_len {
        return Err(ProverError::IncompleteWitness {
            field: "qrDataPadded".into(),
            expected: max_len,
            actual: padded_length,
        });
    }

    let mut padded = Vec::with_capacity(max_len);
    padded.extend_from_slice(message);
    padded.push(0x80);
    padded.resize(padded_length - 8, 0);
    padded.extend_from_slice(&((message.len() as u64) * 8).to_be_bytes());
    padded.resize(max_len, 0);

    debug!(message = message.len(), padded_length, "Applied SHA padding");
    Ok((padded, padded_length))
}

/// Smallest multiple of 64 holding the message, the 0x80 byte and the length
pub fn sha_padded_length(len: usize) -> usize {
    (len + 9).div_ceil(SHA_BLOCK) * SHA_BLOCK
}

fn expect_len(field: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ProverError::IncompleteWitness {
            field: field.into(),
            expected,
            actual,
        })
    }
}

fn fits_field(value: &BigUint) -> bool {
    let modulus: BigUint = Fr::MODULUS.into();
    value < &modulus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::HashAlgorithm;
    use crate::circuit::ClaimOutputs;
    use crate::codec::encode_qr_payload;
    use crate::fields::{Field, FieldTable, QrLayout, DELIMITER};
    use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::traits::PublicKeyParts;
    use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

    const TEST_CERT: &str = include_str!("../tests/fixtures/test_cert.pem");
    const TEST_KEY: &str = include_str!("../tests/fixtures/test_key.pem");
    const TEST_QR: &str = include_str!("../tests/fixtures/test_qr_v2.txt");

    const V1_FIELDS: [&[u8]; 16] = [
        b"3",
        b"269720190308114407437",
        b"Sumit Kumar",
        b"01-01-1984",
        b"M",
        b"C/O Ishwar Chand",
        b"East Delhi",
        b"",
        b"B-31, 3rd Floor",
        b"",
        b"110051",
        b"Krishna Nagar",
        b"Delhi",
        b"Gali No 6",
        b"Gandhi Nagar",
        b"Krishna Nagar",
    ];

    fn seed() -> BigUint {
        BigUint::from(12345678u32)
    }

    /// Legacy payload without version marker, signed with SHA-1
    fn legacy_qr() -> String {
        let mut data = Vec::new();
        for field in V1_FIELDS {
            data.extend_from_slice(field);
            data.push(DELIMITER);
        }
        data.extend_from_slice(&[0xA5; 200]);

        let key = RsaPrivateKey::from_pkcs8_pem(TEST_KEY).unwrap();
        let digest = HashAlgorithm::Sha1.digest(&data);
        let signature = key.sign(Pkcs1v15Sign::new::<sha1::Sha1>(), &digest).unwrap();

        let mut payload = data;
        payload.extend_from_slice(&signature);
        encode_qr_payload(&payload).unwrap()
    }

    #[test]
    fn test_sha_padding_matches_digest_blocks() {
        let (padded, length) = sha_pad(b"abc", 128).unwrap();
        assert_eq!(length, 64);
        assert_eq!(padded.len(), 128);
        assert_eq!(padded[3], 0x80);
        assert_eq!(padded[63], 24);
        assert!(padded[64..].iter().all(|&b| b == 0));

        assert_eq!(sha_padded_length(55), 64);
        assert_eq!(sha_padded_length(56), 128);
        assert!(sha_pad(&[0u8; 120], 128).is_err());
    }

    #[test]
    fn test_build_fixture() {
        let builder = WitnessBuilder::new(CircuitConfig::v2());
        let witness = builder
            .build(TEST_QR, TEST_CERT, b"1", &seed(), RevealFlags::all())
            .unwrap();

        assert_eq!(witness.data_length, 505);
        assert_eq!(witness.qr_data_padded_length, 576);
        assert_eq!(witness.qr_data_padded.len(), 1536);
        assert_eq!(
            witness.delimiter_indices,
            vec![2, 4, 26, 38, 49, 51, 68, 79, 80, 96, 97, 104, 118, 124, 152, 165, 179, 184]
        );
        assert_eq!(witness.signature.len(), 17);
        assert_eq!(witness.pub_key.len(), 17);
        assert!(witness.signed_data().starts_with(b"V2"));
        witness.validate().unwrap();
        assert_eq!(witness.qr_data_padded[505], 0x80);
        assert_eq!(&witness.qr_data_padded[568..576], &(505u64 * 8).to_be_bytes());
    }

    #[test]
    fn test_build_legacy_payload() {
        let qr = legacy_qr();
        let witness = WitnessBuilder::new(CircuitConfig::legacy())
            .build(&qr, TEST_CERT, b"1", &seed(), RevealFlags::all())
            .unwrap();

        let expected: Vec<usize> = V1_FIELDS
            .iter()
            .scan(0, |offset, field| {
                let delimiter = *offset + field.len();
                *offset = delimiter + 1;
                Some(delimiter)
            })
            .collect();
        assert_eq!(&expected[..3], &[1, 23, 35]);
        assert_eq!(witness.delimiter_indices, expected);
        assert_eq!(witness.data_length, 359);
        assert_eq!(witness.qr_data_padded_length, 384);
        assert_eq!(witness.qr_data_padded.len(), 1024);
        assert_eq!(witness.signature.len(), 32);
        assert_eq!(witness.pub_key.len(), 32);

        let table = FieldTable::from_signed_data(witness.signed_data(), QrLayout::V1);
        assert_eq!(table.timestamp().unwrap(), 1_552_023_000);
        assert_eq!(table.dob().unwrap(), 441_743_400);
        assert_eq!(table.get(Field::Name), b"Sumit Kumar");
        assert!(table.get(Field::PhoneLast4).is_empty());
        assert_eq!(table.get(Field::Photo).len(), 200);

        let outputs = ClaimOutputs::compute(&witness).unwrap();
        assert_eq!(outputs.timestamp, Fr::from(1_552_023_000u64));
        assert_eq!(outputs.pincode, Fr::from(110_051u64));
        assert!(outputs.age_above_18);

        // SHA-256 circuits refuse the SHA-1 signature
        let err = WitnessBuilder::new(CircuitConfig::v2())
            .build(&qr, TEST_CERT, b"1", &seed(), RevealFlags::all())
            .unwrap_err();
        assert!(matches!(
            err,
            ProverError::Verification(VerificationError::InvalidSignature)
        ));
    }

    #[test]
    fn test_non_standard_exponent_rejected() {
        let private = RsaPrivateKey::from_pkcs8_pem(TEST_KEY).unwrap();
        let public = RsaPublicKey::new(private.n().clone(), rsa::BigUint::from(3u32)).unwrap();
        let pem = public.to_public_key_pem(LineEnding::LF).unwrap();
        let key = PublicKeyMaterial::from_pem(&pem).unwrap();

        let payload = decode_qr_payload(TEST_QR).unwrap();
        let (data, signature) = split_signed_message(&payload).unwrap();
        let err = WitnessBuilder::new(CircuitConfig::v2())
            .assemble(data, signature, &key, b"1", &seed(), RevealFlags::none())
            .unwrap_err();
        assert!(matches!(err, ProverError::InvalidInput { .. }));
    }

    #[test]
    fn test_circuit_input_names_and_shapes() {
        let builder = WitnessBuilder::new(CircuitConfig::v2());
        let witness = builder
            .build(TEST_QR, TEST_CERT, b"1", &seed(), RevealFlags::none())
            .unwrap();

        let inputs = witness.to_circuit_input();
        let names: Vec<&str> = inputs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "qrDataPadded",
                "qrDataPaddedLength",
                "dataLength",
                "delimiterIndices",
                "signature",
                "pubKey",
                "nullifierSeed",
                "signalHash",
                "revealAgeAbove18",
                "revealGender",
                "revealPinCode",
                "revealState",
            ]
        );
        assert_eq!(inputs[0].1.len(), 1536);
        assert_eq!(inputs[6].1, vec![seed()]);
        assert_eq!(inputs[8].1, vec![BigUint::from(0u8)]);

        let json = witness.to_json();
        assert_eq!(json["qrDataPaddedLength"], "576");
        assert_eq!(json["nullifierSeed"], "12345678");
        assert_eq!(json["delimiterIndices"][0], "2");
        assert_eq!(json["pubKey"].as_array().unwrap().len(), 17);
    }

    #[test]
    fn test_wrong_certificate_rejected() {
        let other = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = other
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let builder = WitnessBuilder::new(CircuitConfig::v2());
        let err = builder
            .build(TEST_QR, &pem, b"1", &seed(), RevealFlags::none())
            .unwrap_err();
        assert!(matches!(
            err,
            ProverError::Verification(VerificationError::InvalidSignature)
        ));
    }

    #[test]
    fn test_layout_mismatch_is_incomplete() {
        let mut config = CircuitConfig::v2();
        config.max_data_length = 512;
        let builder = WitnessBuilder::new(config);
        let err = builder
            .build(TEST_QR, TEST_CERT, b"1", &seed(), RevealFlags::none())
            .unwrap_err();
        assert!(matches!(
            err,
            ProverError::IncompleteWitness { expected: 512, actual: 576, .. }
        ));

        let mut witness = WitnessBuilder::new(CircuitConfig::v2())
            .build(TEST_QR, TEST_CERT, b"1", &seed(), RevealFlags::none())
            .unwrap();
        witness.config.layout = QrLayout::V1;
        assert!(matches!(
            witness.validate(),
            Err(ProverError::IncompleteWitness { expected: 16, actual: 18, .. })
        ));
    }

    #[test]
    fn test_oversized_seed_rejected() {
        let builder = WitnessBuilder::new(CircuitConfig::v2());
        let seed: BigUint = Fr::MODULUS.into();
        assert!(matches!(
            builder.build(TEST_QR, TEST_CERT, b"1", &seed, RevealFlags::none()),
            Err(ProverError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_reveal_flags_serde() {
        let json = serde_json::to_value(RevealFlags::all()).unwrap();
        assert_eq!(json["revealAgeAbove18"], true);
        assert_eq!(json["revealPinCode"], true);

        let flags: RevealFlags = serde_json::from_str(r#"{"revealGender":true}"#).unwrap();
        assert!(flags.gender);
        assert!(!flags.state);
    }
}
