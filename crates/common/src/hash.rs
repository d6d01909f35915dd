//! SHA-256 digest primitives for integrity verification.
//!
//! All digests are rendered as 64-character lowercase hex strings wrapped in
//! [`DigestValue`]. Data payloads go through
//! [`digest_string_timing_normalized`]; attachments through [`digest_binary`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use subtle::ConstantTimeEq;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Block size the timing-normalized digest pads its scratch buffer to.
pub const TIMING_BLOCK_SIZE: usize = 1024;

/// A validated, lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DigestValue(String);

impl DigestValue {
    /// Parse a hex digest, normalizing it to lowercase.
    pub fn parse(s: &str) -> Result<Self> {
        if !is_hex_digest(s) {
            return Err(Error::InvalidDigest(format!(
                "expected {} hex characters, got {:?}",
                DIGEST_HEX_LEN, s
            )));
        }
        Ok(DigestValue(s.to_ascii_lowercase()))
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        DigestValue(hex::encode(bytes))
    }

    /// The canonical lowercase hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a stored digest string.
    ///
    /// The candidate's length and character class are checked first; a
    /// malformed candidate never matches. Comparison is case-insensitive and
    /// constant-time over the digest bytes.
    pub fn matches(&self, candidate: &str) -> bool {
        if !is_hex_digest(candidate) {
            return false;
        }
        let candidate = candidate.to_ascii_lowercase();
        bool::from(self.0.as_bytes().ct_eq(candidate.as_bytes()))
    }
}

impl fmt::Display for DigestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DigestValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DigestValue {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        DigestValue::parse(&s)
    }
}

impl From<DigestValue> for String {
    fn from(d: DigestValue) -> Self {
        d.0
    }
}

/// Check that `s` is exactly 64 hex characters (either case).
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compute SHA-256 of a UTF-8 string.
pub fn digest_string(content: &str) -> DigestValue {
    digest_binary(content.as_bytes())
}

/// Compute SHA-256 of a byte buffer.
pub fn digest_binary(data: impl AsRef<[u8]>) -> DigestValue {
    DigestValue::from_bytes(&Sha256::digest(data.as_ref()))
}

/// Compute SHA-256 of a string with padded, length-independent extra work.
///
/// The returned digest is identical to [`digest_string`]. In addition, the
/// content is copied into a zero-padded scratch buffer rounded up to
/// [`TIMING_BLOCK_SIZE`] and that buffer is hashed too, so wall-clock time
/// tracks the padded block count rather than the exact length. This is a
/// best-effort mitigation, not a constant-time guarantee.
pub fn digest_string_timing_normalized(content: &str) -> DigestValue {
    let bytes = content.as_bytes();
    let digest = digest_binary(bytes);

    let blocks = bytes.len().div_ceil(TIMING_BLOCK_SIZE).max(1);
    let mut scratch = vec![0u8; blocks * TIMING_BLOCK_SIZE];
    scratch[..bytes.len()].copy_from_slice(bytes);
    let padded = Sha256::digest(std::hint::black_box(&scratch));

    // Fold the padded hash into a check the optimizer cannot see through.
    let folded = padded.iter().fold(0u8, |acc, b| acc ^ b);
    std::hint::black_box(folded);

    digest
}

/// Compute SHA-256 of a reader.
pub fn digest_reader<R: Read>(mut reader: R) -> std::io::Result<DigestValue> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(DigestValue::from_bytes(&hasher.finalize()))
}

/// Digest an untyped string value through the timing-normalized path.
///
/// Only JSON strings are accepted; anything else is an `InvalidInput` error
/// naming `param` and the JSON type received.
pub fn digest_string_value(param: &str, value: &Value) -> Result<DigestValue> {
    let content = expect_str(param, value)?;
    Ok(digest_string_timing_normalized(content))
}

/// Digest an untyped byte-array value (a JSON array of integers 0..=255).
pub fn digest_binary_value(param: &str, value: &Value) -> Result<DigestValue> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::invalid_input(param, "byte array", json_type_name(value)))?;

    let mut bytes = Vec::with_capacity(items.len());
    for item in items {
        let byte = item
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| {
                Error::invalid_input(param, "byte array", format!("array containing {}", item))
            })?;
        bytes.push(byte);
    }
    Ok(digest_binary(&bytes))
}

/// Borrow a JSON value as a string or fail with `InvalidInput`.
pub fn expect_str<'a>(param: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::invalid_input(param, "string", json_type_name(value)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
