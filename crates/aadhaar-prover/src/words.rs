//! Fixed-width word chunking of big integers for circuit inputs

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{ProverError, Result};

/// A big integer split into little-endian words of a fixed bit width.
///
/// Serialized as decimal strings, the form circuit input files use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct WordArray(Vec<BigUint>);

impl WordArray {
    /// Words, least significant first
    pub fn words(&self) -> &[BigUint] {
        &self.0
    }

    /// Number of words
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no words
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decimal string rendering of every word
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }

    /// Parse decimal strings
    pub fn from_strings<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        words
            .iter()
            .map(|w| {
                BigUint::parse_bytes(w.as_ref().as_bytes(), 10).ok_or_else(|| {
                    ProverError::InvalidInput {
                        field: "word".into(),
                        value: w.as_ref().to_string(),
                        expected: "decimal integer".into(),
                    }
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl From<WordArray> for Vec<String> {
    fn from(words: WordArray) -> Self {
        words.to_strings()
    }
}

impl TryFrom<Vec<String>> for WordArray {
    type Error = ProverError;

    fn try_from(words: Vec<String>) -> Result<Self> {
        Self::from_strings(words.as_slice())
    }
}

/// Split `value` into `word_count` words of `word_bits` bits.
///
/// Fails with [`ProverError::Overflow`] when `value >= 2^(word_bits * word_count)`.
pub fn split_to_words(value: &BigUint, word_bits: usize, word_count: usize) -> Result<WordArray> {
    check_shape(word_bits, word_count)?;

    let mask = (BigUint::one() << word_bits) - 1u32;
    let mut rest = value.clone();
    let mut words = Vec::with_capacity(word_count);

    for _ in 0..word_count {
        words.push(&rest & &mask);
        rest >>= word_bits;
    }

    if !rest.is_zero() {
        return Err(ProverError::Overflow {
            bits: value.bits(),
            budget: (word_bits * word_count) as u64,
            word_bits,
            word_count,
        });
    }

    Ok(WordArray(words))
}

/// Reassemble `Σ word[i] · 2^(word_bits · i)`.
pub fn join_words(words: &WordArray, word_bits: usize) -> Result<BigUint> {
    check_shape(word_bits, words.len().max(1))?;

    let limit = BigUint::one() << word_bits;
    if let Some((i, word)) = words.words().iter().enumerate().find(|(_, w)| **w >= limit) {
        return Err(ProverError::InvalidInput {
            field: format!("word[{i}]"),
            value: word.to_string(),
            expected: format!("< 2^{word_bits}"),
        });
    }

    Ok(words
        .words()
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, word| (acc << word_bits) + word))
}

fn check_shape(word_bits: usize, word_count: usize) -> Result<()> {
    if word_bits == 0 || word_count == 0 {
        return Err(ProverError::InvalidInput {
            field: "word shape".into(),
            value: format!("{word_bits}x{word_count}"),
            expected: "non-zero word size and count".into(),
        });
    }
    Ok(())
}
