#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Known-answer tests for PBKDF2-HMAC-SHA-256 (32-byte output).
//!
//! Vectors: P = "password", S = "salt", widely published alongside RFC 6070.

use notecrypt_crypto_core::kdf::pbkdf2_sha256;

fn hex(bytes: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(bytes)
}

#[test]
fn pbkdf2_sha256_one_iteration() {
    let key = pbkdf2_sha256(b"password", b"salt", 1).unwrap();
    assert_eq!(
        hex(key.expose()),
        "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
    );
}

#[test]
fn pbkdf2_sha256_two_iterations() {
    let key = pbkdf2_sha256(b"password", b"salt", 2).unwrap();
    assert_eq!(
        hex(key.expose()),
        "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43"
    );
}

#[test]
fn pbkdf2_sha256_4096_iterations() {
    let key = pbkdf2_sha256(b"password", b"salt", 4096).unwrap();
    assert_eq!(
        hex(key.expose()),
        "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a"
    );
}
