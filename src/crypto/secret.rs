//! Secret and challenge generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

/// Secrets of this many bytes or more are rejected by the protocol
pub const SECRET_MAX_BYTES: usize = 200;

const TOKEN_BYTES: usize = 32;

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a new random subscription secret
pub fn generate_secret() -> String {
    random_token()
}

/// Generate a new random confirmation challenge
pub fn generate_challenge() -> String {
    random_token()
}

/// Whether a secret exceeds the protocol ceiling
pub fn too_big(secret: &str) -> bool {
    secret.len() >= SECRET_MAX_BYTES
}
