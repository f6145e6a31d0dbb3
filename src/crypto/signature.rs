//! HMAC signing and verification of notification bodies

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::models::WebSubError;

/// Header carrying `<algorithm>=<hex digest>`
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Hash algorithms accepted in `X-Hub-Signature`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha384 => "sha384",
            SignatureAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = WebSubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            "sha384" => Ok(SignatureAlgorithm::Sha384),
            "sha512" => Ok(SignatureAlgorithm::Sha512),
            other => Err(WebSubError::validation(format!(
                "Unsupported signature algorithm: {}",
                other
            ))),
        }
    }
}

fn keyed<M: Mac + KeyInit>(secret: &str, body: &[u8]) -> M {
    let mut mac =
        <M as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC key size is always valid");
    mac.update(body);
    mac
}

fn hex_digest<M: Mac + KeyInit>(secret: &str, body: &[u8]) -> String {
    hex::encode(keyed::<M>(secret, body).finalize().into_bytes())
}

fn matches<M: Mac + KeyInit>(secret: &str, body: &[u8], expected: &[u8]) -> bool {
    keyed::<M>(secret, body).verify_slice(expected).is_ok()
}

/// Sign `body` with `secret`, returning the lowercase hex digest
pub fn sign(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
    match algorithm {
        SignatureAlgorithm::Sha1 => hex_digest::<Hmac<Sha1>>(secret, body),
        SignatureAlgorithm::Sha256 => hex_digest::<Hmac<Sha256>>(secret, body),
        SignatureAlgorithm::Sha384 => hex_digest::<Hmac<Sha384>>(secret, body),
        SignatureAlgorithm::Sha512 => hex_digest::<Hmac<Sha512>>(secret, body),
    }
}

/// Full `X-Hub-Signature` header value for `body`
pub fn signature_header(algorithm: SignatureAlgorithm, secret: &str, body: &[u8]) -> String {
    format!("{}={}", algorithm, sign(algorithm, secret, body))
}

/// Verify an `X-Hub-Signature` header against `body`.
///
/// Any malformed or missing header counts as an invalid signature. The digest
/// comparison is constant-time.
pub fn verify(header: Option<&str>, secret: &str, body: &[u8]) -> bool {
    let Some(header) = header else {
        warn!("{} header expected but not set", SIGNATURE_HEADER);
        return false;
    };

    let Some((algorithm, digest)) = header.trim().split_once('=') else {
        warn!("{} header is invalid: {}", SIGNATURE_HEADER, header);
        return false;
    };

    let algorithm = match algorithm.parse::<SignatureAlgorithm>() {
        Ok(algorithm) => algorithm,
        Err(_) => {
            warn!("Invalid algorithm in {}: {}", SIGNATURE_HEADER, algorithm);
            return false;
        }
    };

    let Ok(expected) = hex::decode(digest) else {
        warn!("{} digest is not hex", SIGNATURE_HEADER);
        return false;
    };

    match algorithm {
        SignatureAlgorithm::Sha1 => matches::<Hmac<Sha1>>(secret, body, &expected),
        SignatureAlgorithm::Sha256 => matches::<Hmac<Sha256>>(secret, body, &expected),
        SignatureAlgorithm::Sha384 => matches::<Hmac<Sha384>>(secret, body, &expected),
        SignatureAlgorithm::Sha512 => matches::<Hmac<Sha512>>(secret, body, &expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let digest = sign(
            SignatureAlgorithm::Sha256,
            "Jefe",
            b"what do ya want for nothing?",
        );
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_sha256() {
        let body = b"Hello, subscribers!";
        let header = signature_header(SignatureAlgorithm::Sha256, "S", body);

        assert!(header.starts_with("sha256="));
        assert!(verify(Some(&header), "S", body));
    }

    #[test]
    fn test_verify_wrong_secret_or_algorithm() {
        let body = b"Hello, subscribers!";
        let digest = sign(SignatureAlgorithm::Sha256, "S", body);

        assert!(!verify(Some(&format!("sha256={}", digest)), "other", body));
        assert!(!verify(Some(&format!("sha1={}", digest)), "S", body));
        assert!(!verify(Some(&format!("sha512={}", digest)), "S", body));
    }

    #[test]
    fn test_verify_wrong_body() {
        let header = signature_header(SignatureAlgorithm::Sha1, "S", b"original");
        assert!(!verify(Some(&header), "S", b"tampered"));
    }

    #[test]
    fn test_verify_fails_closed() {
        let body = b"payload";
        assert!(!verify(None, "S", body));
        assert!(!verify(Some("garbage"), "S", body));
        assert!(!verify(Some("md5=abcdef"), "S", body));
        assert!(!verify(Some("sha1=not-hex"), "S", body));
        assert!(!verify(Some("sha1="), "S", body));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA256".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha256);
        assert_eq!(SignatureAlgorithm::default(), SignatureAlgorithm::Sha1);
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }
}
