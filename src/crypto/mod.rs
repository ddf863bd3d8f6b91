//! Per-token key material: provisioning, envelope decryption and response signing.

pub mod canonical;
pub mod channel;
pub mod keys;

pub use channel::{seal, verify, CryptoChannel, SignedPayload};
pub use keys::{DigestAlgorithm, KeyFamily, KeyPair, KeyPairOptions};
