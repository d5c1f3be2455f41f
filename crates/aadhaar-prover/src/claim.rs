//! Public signals of a proof and their projection into a user-facing claim

use ark_bn254::Fr;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{ProverError, Result};
use crate::hashing::biguint_to_fr;
use crate::witness::RevealFlags;

/// Public outputs of the claim circuit, in signal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicSignal {
    IdentityNullifier,
    UserNullifier,
    Timestamp,
    PubkeyHash,
    SignalHash,
    AgeAbove18,
    Gender,
    Pincode,
    State,
    NullifierSeed,
}

impl PublicSignal {
    /// Signal order
    pub const ALL: [PublicSignal; 10] = [
        PublicSignal::IdentityNullifier,
        PublicSignal::UserNullifier,
        PublicSignal::Timestamp,
        PublicSignal::PubkeyHash,
        PublicSignal::SignalHash,
        PublicSignal::AgeAbove18,
        PublicSignal::Gender,
        PublicSignal::Pincode,
        PublicSignal::State,
        PublicSignal::NullifierSeed,
    ];

    /// Number of public signals
    pub const COUNT: usize = Self::ALL.len();

    /// Position in the public signal list
    pub fn index(self) -> usize {
        self as usize
    }

    /// Circuit output name
    pub fn name(self) -> &'static str {
        match self {
            Self::IdentityNullifier => "identityNullifier",
            Self::UserNullifier => "userNullifier",
            Self::Timestamp => "timestamp",
            Self::PubkeyHash => "pubkeyHash",
            Self::SignalHash => "signalHash",
            Self::AgeAbove18 => "ageAbove18",
            Self::Gender => "gender",
            Self::Pincode => "pincode",
            Self::State => "state",
            Self::NullifierSeed => "nullifierSeed",
        }
    }
}

/// Ordered public signals, serialized as decimal strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct PublicSignals(pub(crate) Vec<BigUint>);

impl PublicSignals {
    /// Wrap exactly [`PublicSignal::COUNT`] values
    pub fn new(values: Vec<BigUint>) -> Result<Self> {
        if values.len() != PublicSignal::COUNT {
            return Err(ProverError::InvalidProofFormat {
                reason: format!(
                    "expected {} public signals, got {}",
                    PublicSignal::COUNT,
                    values.len()
                ),
            });
        }
        Ok(Self(values))
    }

    /// Value of one signal
    pub fn get(&self, signal: PublicSignal) -> &BigUint {
        &self.0[signal.index()]
    }

    /// All values in order
    pub fn values(&self) -> &[BigUint] {
        &self.0
    }

    /// Values as scalar field elements, the verifier's input
    pub fn to_field_elements(&self) -> Vec<Fr> {
        self.0.iter().map(biguint_to_fr).collect()
    }

    /// Decimal strings in order
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl From<PublicSignals> for Vec<String> {
    fn from(signals: PublicSignals) -> Self {
        signals.to_strings()
    }
}

impl TryFrom<Vec<String>> for PublicSignals {
    type Error = ProverError;

    fn try_from(strings: Vec<String>) -> Result<Self> {
        let values = strings
            .iter()
            .map(|s| {
                BigUint::parse_bytes(s.as_bytes(), 10).ok_or_else(|| {
                    ProverError::InvalidProofFormat {
                        reason: format!("public signal {s:?} is not a decimal integer"),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(values)
    }
}

/// User-facing attributes; `None` for anything not revealed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub age_above_18: Option<bool>,
    pub gender: Option<String>,
    pub pincode: Option<String>,
    pub state: Option<String>,
}

/// Project revealed signals into a [`Claim`].
///
/// Unset flags always yield `None`, whatever the signal carries.
pub fn project_claim(signals: &PublicSignals, reveal: &RevealFlags) -> Claim {
    Claim {
        age_above_18: reveal
            .age_above_18
            .then(|| !signals.get(PublicSignal::AgeAbove18).is_zero()),
        gender: reveal
            .gender
            .then(|| unpack_text(signals.get(PublicSignal::Gender))),
        pincode: reveal
            .pincode
            .then(|| signals.get(PublicSignal::Pincode).to_string()),
        state: reveal
            .state
            .then(|| unpack_text(signals.get(PublicSignal::State))),
    }
}

/// Little-endian packed ASCII back to text
pub fn unpack_text(value: &BigUint) -> String {
    if value.is_zero() {
        return String::new();
    }
    if let Some(byte) = value.to_u8() {
        return char::from(byte).to_string();
    }
    String::from_utf8_lossy(&value.to_bytes_le()).into_owned()
}

/// Inverse of [`unpack_text`]
pub fn pack_text(text: &[u8]) -> BigUint {
    BigUint::from_bytes_le(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> PublicSignals {
        PublicSignals::new(vec![
            BigUint::from(11u32),
            BigUint::from(22u32),
            BigUint::from(1_552_023_000u64),
            BigUint::from(33u32),
            BigUint::from(44u32),
            BigUint::from(1u32),
            BigUint::from(u32::from(b'M')),
            BigUint::from(110_051u32),
            pack_text(b"Delhi"),
            BigUint::from(12_345_678u32),
        ])
        .unwrap()
    }

    #[test]
    fn test_no_flags_reveal_nothing() {
        assert_eq!(project_claim(&signals(), &RevealFlags::none()), Claim::default());
    }

    #[test]
    fn test_all_flags() {
        let claim = project_claim(&signals(), &RevealFlags::all());
        assert_eq!(claim.age_above_18, Some(true));
        assert_eq!(claim.gender.as_deref(), Some("M"));
        assert_eq!(claim.pincode.as_deref(), Some("110051"));
        assert_eq!(claim.state.as_deref(), Some("Delhi"));
    }

    #[test]
    fn test_partial_flags() {
        let reveal = RevealFlags {
            state: true,
            ..RevealFlags::none()
        };
        let claim = project_claim(&signals(), &reveal);
        assert_eq!(claim.state.as_deref(), Some("Delhi"));
        assert!(claim.gender.is_none() && claim.pincode.is_none());
        assert!(claim.age_above_18.is_none());
    }

    #[test]
    fn test_signal_count_enforced() {
        assert!(PublicSignals::new(vec![BigUint::from(1u8); 9]).is_err());
        let parsed: std::result::Result<PublicSignals, _> =
            serde_json::from_str(r#"["1","2"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_serde_decimal_strings() {
        let json = serde_json::to_string(&signals()).unwrap();
        assert!(json.starts_with(r#"["11","22","1552023000""#));
        let back: PublicSignals = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signals());
    }

    #[test]
    fn test_claim_json_field_names() {
        let json = serde_json::to_value(project_claim(&signals(), &RevealFlags::all())).unwrap();
        assert_eq!(json["ageAbove18"], true);
        assert_eq!(json["pincode"], "110051");
    }
}
