//! Conversions between the QR decimal numeral, big integers and bytes

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use flate2::Compression;
use num_bigint::BigUint;

use crate::error::{ProverError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Big-endian minimal encoding. Zero encodes as a single zero byte.
pub fn big_int_to_bytes(n: &BigUint) -> Vec<u8> {
    n.to_bytes_be()
}

/// Big-endian decoding; leading zero bytes are accepted.
pub fn bytes_to_big_int(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Decompress a gzip, zlib or raw DEFLATE stream.
///
/// Secure QR codes carry gzip; the other framings are accepted so that
/// payloads produced by other encoders decode the same way.
pub fn inflate(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return Err(ProverError::Codec {
            reason: "compressed stream is empty".into(),
        });
    }

    let mut out = Vec::new();
    let read = if bytes.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(bytes).read_to_end(&mut out)
    } else if is_zlib_header(bytes) {
        ZlibDecoder::new(bytes).read_to_end(&mut out)
    } else {
        DeflateDecoder::new(bytes).read_to_end(&mut out)
    };

    read.map_err(|e| ProverError::Codec {
        reason: format!("inflate failed: {e}"),
    })?;

    Ok(out)
}

/// Gzip-compress bytes. Only test-data generators need this direction.
pub fn deflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decode a scanned QR numeral into the decompressed payload.
pub fn decode_qr_payload(numeral: &str) -> Result<Vec<u8>> {
    let numeral = numeral.trim();
    if numeral.is_empty() || !numeral.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProverError::Codec {
            reason: "QR payload must be a non-empty decimal numeral".into(),
        });
    }

    let value = BigUint::parse_bytes(numeral.as_bytes(), 10).ok_or_else(|| ProverError::Codec {
        reason: "QR payload is not a decimal numeral".into(),
    })?;

    let decompressed = inflate(&big_int_to_bytes(&value))?;
    tracing::debug!(
        compressed = numeral.len(),
        decompressed = decompressed.len(),
        "Decoded QR payload"
    );
    Ok(decompressed)
}

/// Compress a payload and render it as a QR numeral.
pub fn encode_qr_payload(payload: &[u8]) -> Result<String> {
    Ok(bytes_to_big_int(&deflate(payload)?).to_str_radix(10))
}

fn is_zlib_header(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}
