//! Cryptographic operations for WebSub
//!
//! Secrets and challenges come from the OS CSPRNG; notification bodies are
//! authenticated with HMAC (`X-Hub-Signature`).

mod secret;
mod signature;

pub use secret::*;
pub use signature::*;
