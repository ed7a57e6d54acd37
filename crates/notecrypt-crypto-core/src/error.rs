//! Cryptographic error types for `notecrypt-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A required primitive is unavailable (CSPRNG check failed, bad iteration count).
    #[error("crypto configuration error: {0}")]
    Configuration(String),

    /// PBKDF2 derivation rejected its inputs.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// AES-256-GCM sealing failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Authentication tag verification failed: ciphertext tampered, wrong key,
    /// wrong IV or wrong salt.
    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Base64 or UTF-8 decoding failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Secure buffer allocation or CSPRNG failure.
    #[error("secure memory error: {0}")]
    SecureMemory(String),
}
