//! Signer certificate handling and raw RSA signature verification

use num_bigint::BigUint;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::error::{ProverError, Result};

/// Digest used by the QR signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Legacy QR codes
    Sha1,
    /// Current QR codes
    Sha256,
}

impl HashAlgorithm {
    /// Digest of `message`
    pub fn digest(self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(message).to_vec(),
            Self::Sha256 => Sha256::digest(message).to_vec(),
        }
    }

    /// Digest length in bytes
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

/// RSA public key of a QR signer, with the certificate subject when known
#[derive(Debug, Clone)]
pub struct PublicKeyMaterial {
    key: RsaPublicKey,
    modulus: BigUint,
    exponent: BigUint,
    subject: Option<String>,
}

impl PublicKeyMaterial {
    /// Parse a PEM block: `CERTIFICATE`, `PUBLIC KEY` or `RSA PUBLIC KEY`
    pub fn from_pem(pem: &str) -> Result<Self> {
        let (_, block) = parse_x509_pem(pem.trim().as_bytes())
            .map_err(|e| ProverError::malformed(format!("Failed to parse PEM: {e}")))?;

        match block.label.as_str() {
            "CERTIFICATE" => Self::from_certificate_der(&block.contents),
            "PUBLIC KEY" => RsaPublicKey::from_public_key_der(&block.contents)
                .map_err(|e| ProverError::malformed(format!("Failed to parse public key: {e}")))
                .map(|key| Self::from_key(key, None)),
            "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_der(&block.contents)
                .map_err(|e| ProverError::malformed(format!("Failed to parse RSA key: {e}")))
                .map(|key| Self::from_key(key, None)),
            other => Err(ProverError::malformed(format!("Unsupported PEM block: {other}"))),
        }
    }

    /// Parse DER: an X.509 certificate, then SPKI, then PKCS#1
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Self::from_certificate_der(der)
            .or_else(|_| {
                RsaPublicKey::from_public_key_der(der)
                    .or_else(|_| RsaPublicKey::from_pkcs1_der(der))
                    .map(|key| Self::from_key(key, None))
            })
            .map_err(|_| ProverError::malformed("DER is neither a certificate nor an RSA key"))
    }

    fn from_certificate_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| ProverError::malformed(format!("Failed to parse certificate: {e}")))?;

        debug!("Certificate subject: {}", cert.subject());
        debug!(
            "Certificate validity: {:?} to {:?}",
            cert.validity().not_before,
            cert.validity().not_after
        );

        let key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
            .or_else(|_| {
                RsaPublicKey::from_pkcs1_der(&cert.public_key().subject_public_key.data)
            })
            .map_err(|e| ProverError::malformed(format!("Failed to parse RSA public key: {e}")))?;

        Ok(Self::from_key(key, Some(cert.subject().to_string())))
    }

    fn from_key(key: RsaPublicKey, subject: Option<String>) -> Self {
        let modulus = BigUint::from_bytes_be(&key.n().to_bytes_be());
        let exponent = BigUint::from_bytes_be(&key.e().to_bytes_be());
        Self {
            key,
            modulus,
            exponent,
            subject,
        }
    }

    /// RSA modulus
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Modulus as lowercase hex
    pub fn modulus_hex(&self) -> String {
        self.modulus.to_str_radix(16)
    }

    /// Public exponent
    pub fn exponent(&self) -> &BigUint {
        &self.exponent
    }

    /// Modulus size in bytes
    pub fn size(&self) -> usize {
        self.key.size()
    }

    /// Certificate subject, when parsed from a certificate
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

/// Outcome of a signature check against one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    /// Whether the decrypted block ends with the message digest
    pub valid: bool,
    /// Modulus of the key checked, reported regardless of validity
    pub modulus: BigUint,
    /// Same modulus, hex encoded
    pub modulus_hex: String,
}

/// Result of trying several keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    /// Index of the matching key, if any
    pub key_index: Option<usize>,
    /// Check bound to the matching key, or to the first key when none matched
    pub check: SignatureCheck,
}

/// Verify a raw PKCS#1 v1.5 signature.
///
/// The signature is decrypted with the public exponent and the trailing
/// digest-length bytes of the block are compared with `hash(message)`.
/// A structurally valid but wrong signature returns `valid: false`; bad
/// key material or a length mismatch is an error.
pub fn verify(
    key: &PublicKeyMaterial,
    signature: &[u8],
    message: &[u8],
    hash: HashAlgorithm,
) -> Result<SignatureCheck> {
    let size = key.size();
    if signature.len() != size {
        return Err(ProverError::malformed(format!(
            "signature is {} bytes, key modulus is {size} bytes",
            signature.len()
        )));
    }

    let modulus = key.modulus().clone();
    let modulus_hex = key.modulus_hex();
    let valid = check_signature(
        &modulus,
        key.exponent(),
        &BigUint::from_bytes_be(signature),
        message,
        hash,
    );
    debug!(valid, hash = ?hash, "Checked RSA signature");

    Ok(SignatureCheck {
        valid,
        modulus,
        modulus_hex,
    })
}

/// Raw check on integers: `s^e mod n` must end with `hash(message)`.
pub fn check_signature(
    modulus: &BigUint,
    exponent: &BigUint,
    signature: &BigUint,
    message: &[u8],
    hash: HashAlgorithm,
) -> bool {
    if signature >= modulus {
        warn!("Signature value exceeds modulus");
        return false;
    }

    let size = usize::try_from(modulus.bits().div_ceil(8)).unwrap_or(usize::MAX);
    let decrypted = signature.modpow(exponent, modulus).to_bytes_be();
    let mut block = vec![0u8; size.saturating_sub(decrypted.len())];
    block.extend_from_slice(&decrypted);

    block.ends_with(&hash.digest(message))
}

/// [`verify`] with key material given as PEM
pub fn verify_pem(
    pem: &str,
    signature: &[u8],
    message: &[u8],
    hash: HashAlgorithm,
) -> Result<SignatureCheck> {
    verify(&PublicKeyMaterial::from_pem(pem)?, signature, message, hash)
}

/// Try every key (in parallel with the `parallel` feature); the lowest
/// matching index wins.
#[instrument(skip_all, fields(keys = keys.len()))]
pub fn verify_with_any(
    keys: &[PublicKeyMaterial],
    signature: &[u8],
    message: &[u8],
    hash: HashAlgorithm,
) -> Result<KeyMatch> {
    if keys.is_empty() {
        return Err(ProverError::InvalidInput {
            field: "keys".into(),
            value: "0".into(),
            expected: "at least one trusted key".into(),
        });
    }

    #[cfg(feature = "parallel")]
    let results: Vec<Result<SignatureCheck>> = {
        use rayon::prelude::*;
        keys.par_iter()
            .map(|key| verify(key, signature, message, hash))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<SignatureCheck>> = keys
        .iter()
        .map(|key| verify(key, signature, message, hash))
        .collect();

    if let Some(index) = results
        .iter()
        .position(|r| matches!(r, Ok(check) if check.valid))
    {
        info!(key_index = index, "QR signature matched trusted key");
        let check = results.into_iter().nth(index).and_then(Result::ok);
        return check
            .map(|check| KeyMatch {
                key_index: Some(index),
                check,
            })
            .ok_or_else(|| ProverError::malformed("matched key vanished"));
    }

    warn!("QR signature matched none of the trusted keys");
    let mut first_error = None;
    for result in results {
        match result {
            Ok(check) => {
                return Ok(KeyMatch {
                    key_index: None,
                    check,
                })
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or(ProverError::malformed("no key could be checked")))
}

/// Validity window of a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateValidity {
    /// Certificate subject
    pub subject: String,
    /// Unix seconds
    pub not_before: i64,
    /// Unix seconds
    pub not_after: i64,
}

impl CertificateValidity {
    /// Whether `at` (unix seconds) falls inside the window
    pub fn is_valid_at(&self, at: i64) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Read the validity window of a PEM certificate
pub fn certificate_validity(pem: &str) -> Result<CertificateValidity> {
    let (_, block) = parse_x509_pem(pem.trim().as_bytes())
        .map_err(|e| ProverError::malformed(format!("Failed to parse PEM: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&block.contents)
        .map_err(|e| ProverError::malformed(format!("Failed to parse certificate: {e}")))?;

    Ok(CertificateValidity {
        subject: cert.subject().to_string(),
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
    })
}
