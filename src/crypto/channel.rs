use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

use super::canonical;
use super::keys::{self, DigestAlgorithm};
use crate::errors::{DecryptError, SignError};
use crate::models::token::TokenRecord;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Field injected into every signed payload.
pub const TIMESTAMP_FIELD: &str = "currentTimestamp";

const SESSION_KEY_LEN: usize = 16;
const IV_LEN: usize = 16;

/// A signed response: the verifier checks `signature` against the bytes of `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub signature: String,
    pub data: String,
}

/// Hybrid RSA/AES channel bound to one token's private key.
///
/// Envelopes look like `base64(iv):base64(rsa(session_key)):base64(aes128cbc(json))`.
pub struct CryptoChannel {
    private_key_pem: Zeroizing<String>,
    digest: DigestAlgorithm,
}

impl CryptoChannel {
    pub fn new(private_key_pem: &str, digest: DigestAlgorithm) -> Self {
        Self {
            private_key_pem: Zeroizing::new(private_key_pem.to_string()),
            digest,
        }
    }

    /// Channel using the token's own key pair and signature digest.
    pub fn for_token(token: &TokenRecord) -> Self {
        Self::new(&token.private_key, token.digest)
    }

    fn private_key(&self) -> Result<RsaPrivateKey, String> {
        keys::parse_private_key(&self.private_key_pem)
    }

    /// Opens an encrypted request envelope and parses the plaintext as JSON.
    pub fn decrypt(&self, envelope: &str) -> Result<Value, DecryptError> {
        let segments: Vec<&str> = envelope.trim().split(':').collect();
        if segments.len() != 3 {
            return Err(DecryptError::MalformedEnvelope(segments.len()));
        }

        let iv = decode_segment(segments[0], "iv")?;
        let enc_key = decode_segment(segments[1], "key")?;
        let enc_data = decode_segment(segments[2], "data")?;

        if iv.len() != IV_LEN {
            return Err(DecryptError::Iv(iv.len()));
        }

        let private_key = self.private_key().map_err(DecryptError::PrivateKey)?;
        let session_key = Zeroizing::new(
            private_key
                .decrypt(Pkcs1v15Encrypt, &enc_key)
                .map_err(|_| DecryptError::KeyUnwrap)?,
        );
        if session_key.len() != SESSION_KEY_LEN {
            return Err(DecryptError::SessionKey(session_key.len()));
        }

        let plaintext = Aes128CbcDec::new_from_slices(&session_key, &iv)
            .map_err(|_| DecryptError::Cipher)?
            .decrypt_padded_vec_mut::<Pkcs7>(&enc_data)
            .map_err(|_| DecryptError::Cipher)?;

        serde_json::from_slice(&plaintext).map_err(|_| DecryptError::Json)
    }

    pub fn sign(&self, data: &Value) -> Result<SignedPayload, SignError> {
        self.sign_at(data, chrono::Utc::now().timestamp())
    }

    /// Stamps `data` with `timestamp`, canonicalizes it and signs the canonical JSON.
    pub fn sign_at(&self, data: &Value, timestamp: i64) -> Result<SignedPayload, SignError> {
        let Value::Object(map) = data else {
            return Err(SignError::NotAnObject);
        };
        let mut stamped = map.clone();
        stamped.insert(TIMESTAMP_FIELD.to_string(), Value::from(timestamp));

        let canonical = canonical::to_canonical_string(&Value::Object(stamped))?;

        let private_key = self.private_key().map_err(SignError::PrivateKey)?;
        let signature = match self.digest {
            DigestAlgorithm::Sha256 => SigningKey::<Sha256>::new(private_key)
                .try_sign(canonical.as_bytes())
                .map(|s| s.to_vec()),
            DigestAlgorithm::Sha512 => SigningKey::<Sha512>::new(private_key)
                .try_sign(canonical.as_bytes())
                .map(|s| s.to_vec()),
        }
        .map_err(|e| SignError::Signature(e.to_string()))?;

        Ok(SignedPayload {
            signature: STANDARD.encode(signature),
            data: canonical,
        })
    }
}

/// Client side of the envelope: encrypts `payload` for the holder of `public_key_pem`.
pub fn seal(public_key_pem: &str, payload: &Value) -> anyhow::Result<String> {
    let public_key = keys::parse_public_key(public_key_pem)?;

    let mut session_key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    OsRng.fill_bytes(&mut session_key[..]);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let plaintext = serde_json::to_vec(payload)?;
    let enc_data = Aes128CbcEnc::new_from_slices(&session_key[..], &iv)
        .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    let enc_key = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &session_key[..])
        .map_err(|e| anyhow::anyhow!("session key wrap failed: {}", e))?;

    Ok(format!(
        "{}:{}:{}",
        STANDARD.encode(iv),
        STANDARD.encode(enc_key),
        STANDARD.encode(enc_data)
    ))
}

/// Checks a signed response against the token's public key. `Ok(false)` means mismatch.
pub fn verify(
    public_key_pem: &str,
    signed: &SignedPayload,
    digest: DigestAlgorithm,
) -> anyhow::Result<bool> {
    let public_key = keys::parse_public_key(public_key_pem)?;
    let raw = STANDARD.decode(signed.signature.trim())?;
    let signature = match Signature::try_from(raw.as_slice()) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    let ok = match digest {
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public_key)
            .verify(signed.data.as_bytes(), &signature)
            .is_ok(),
        DigestAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(public_key)
            .verify(signed.data.as_bytes(), &signature)
            .is_ok(),
    };
    Ok(ok)
}

/// Form-encoded transports turn `+` into a space; undo that before decoding.
fn decode_segment(segment: &str, name: &'static str) -> Result<Vec<u8>, DecryptError> {
    let cleaned = segment.trim().replace(' ', "+");
    STANDARD
        .decode(cleaned)
        .map_err(|_| DecryptError::Base64(name))
}
