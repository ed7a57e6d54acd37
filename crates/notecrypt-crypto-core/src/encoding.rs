//! Base64 glue for every field that leaves the crate as text.
//!
//! Uses the padded standard alphabet (RFC 4648 §4) so payloads stay
//! ASCII-safe in JSON bodies and key-value stores.

use crate::error::CryptoError;
use crate::memory::SecretBuffer;

/// Encode bytes as padded standard base64.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    data_encoding::BASE64.encode(bytes)
}

/// Decode padded standard base64.
///
/// # Errors
///
/// Returns `CryptoError::Encoding` naming `what` when the input is not valid
/// base64. The input itself is never echoed.
pub fn decode(what: &str, text: &str) -> Result<Vec<u8>, CryptoError> {
    data_encoding::BASE64
        .decode(text.as_bytes())
        .map_err(|e| CryptoError::Encoding(format!("invalid base64 in {what}: {}", e.kind)))
}

/// Decode base64 into a fixed-size array, rejecting any other length.
///
/// # Errors
///
/// Returns `CryptoError::Encoding` on bad base64 or a length mismatch.
pub fn decode_array<const N: usize>(what: &str, text: &str) -> Result<[u8; N], CryptoError> {
    let bytes = decode(what, text)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        CryptoError::Encoding(format!(
            "{what} has wrong length: {} bytes (expected {N})",
            bytes.len()
        ))
    })
}

/// Decode base64 straight into a [`SecretBuffer`].
///
/// # Errors
///
/// Returns `CryptoError::Encoding` when the input is not valid base64.
pub fn decode_secret(what: &str, text: &str) -> Result<SecretBuffer, CryptoError> {
    decode(what, text).map(SecretBuffer::from_vec)
}
