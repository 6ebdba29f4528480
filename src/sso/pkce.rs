//! Random tokens and the PKCE S256 code challenge

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Bytes of entropy used for `state`, `nonce` and the code verifier.
///
/// Hex encoded this gives 64 characters, inside the 43..=128 range a
/// PKCE verifier must have.
pub const TOKEN_BYTES: usize = 32;

/// Hex-encoded random string built from `len` CSPRNG bytes.
///
/// The result is `2 * len` characters long.
#[must_use]
pub fn generate_random_string(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    hex::encode(bytes)
}

/// `BASE64URL(SHA256(verifier))` without padding.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
