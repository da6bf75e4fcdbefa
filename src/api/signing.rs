use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// Characters left unescaped by JavaScript's `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("private key is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("private key too short: expected at least 32 bytes, got {0}")]
    TooShort(usize),
}

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Ed25519 signature over `message`, base64 encoded. The key is a base64 secret whose first
/// 32 bytes are the seed.
pub fn sign_message(message: &str, private_key_b64: &str) -> Result<String, SigningError> {
    let secret = STANDARD.decode(private_key_b64.trim())?;
    let seed: [u8; 32] = secret
        .get(..32)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(SigningError::TooShort(secret.len()))?;
    let key = SigningKey::from_bytes(&seed);
    let signature = key.sign(message.as_bytes());
    Ok(STANDARD.encode(signature.to_bytes()))
}

/// Canonical message for a signed write: `METHOD:path:body`.
pub fn write_message(method: &str, path: &str, body: &str) -> String {
    format!("{method}:{path}:{body}")
}
